//! OpenSSH client connector.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::HostConnector;
use crate::error::RemoteError;

/// Connects through the system `ssh` binary in batch mode.
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    username: String,
    port: Option<u16>,
    key_file: Option<PathBuf>,
}

impl OpenSshConnector {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            port: None,
            key_file: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_key_file(mut self, key_file: impl Into<PathBuf>) -> Self {
        self.key_file = Some(key_file.into());
        self
    }

    fn base_args(&self, host: &str, connect_timeout: Option<Duration>) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(timeout) = connect_timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(key) = &self.key_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.username, host));
        args
    }
}

#[async_trait]
impl HostConnector for OpenSshConnector {
    async fn connect(&self, host: &str, timeout: Duration) -> Result<(), RemoteError> {
        let output = Command::new("ssh")
            .args(self.base_args(host, Some(timeout)))
            .arg("true")
            .stdin(Stdio::null())
            .output();
        match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(RemoteError::Refused {
                host: host.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(e)) => Err(RemoteError::Spawn(format!("ssh: {}", e))),
            Err(_) => Err(RemoteError::Refused {
                host: host.to_string(),
                reason: format!("timed out after {:?}", timeout),
            }),
        }
    }

    fn command(&self, host: &str, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args(host, None)).arg(remote_command);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_args() {
        let connector = OpenSshConnector::new("sdss")
            .with_port(2222)
            .with_key_file("/home/sdss/.ssh/id_transfer");
        let args = connector.base_args("dtn01", Some(Duration::from_secs(120)));
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=120",
                "-p",
                "2222",
                "-i",
                "/home/sdss/.ssh/id_transfer",
                "sdss@dtn01",
            ]
        );
    }
}
