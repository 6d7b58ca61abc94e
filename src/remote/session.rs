//! Remote command session with ordered host failover.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::HostConnector;
use crate::error::RemoteError;

/// Default per-host connection budget.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default pause between connection attempts to the same host.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteResponse {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A command channel to the first reachable host of a priority list.
pub struct RemoteSession<C> {
    connector: C,
    hosts: Vec<String>,
    timeout: Duration,
    retry_delay: Duration,
    active: Option<String>,
    stdout_sink: Option<File>,
    stderr_sink: Option<File>,
}

impl<C: HostConnector> RemoteSession<C> {
    pub fn new(connector: C, hosts: Vec<String>) -> Self {
        Self {
            connector,
            hosts,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            active: None,
            stdout_sink: None,
            stderr_sink: None,
        }
    }

    /// Builds a session from a comma separated host list, in priority order.
    pub fn from_host_list(connector: C, hosts: &str) -> Self {
        Self::new(connector, parse_host_list(hosts))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn active_host(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Copies remote stdout and stderr into these files as they arrive.
    pub fn set_output_files(&mut self, stdout: &Path, stderr: &Path) -> Result<(), RemoteError> {
        self.stdout_sink = Some(File::create(stdout)?);
        self.stderr_sink = Some(File::create(stderr)?);
        Ok(())
    }

    /// Connects to the first host that accepts within its timeout.
    ///
    /// Each host is retried with a short pause until the per-host timeout
    /// elapses; then the next host is tried. Returns false only when every
    /// host has been exhausted.
    pub async fn connect(&mut self) -> bool {
        if self.active.is_some() {
            return true;
        }
        if self.hosts.is_empty() {
            warn!("{}", RemoteError::NoHosts);
            return false;
        }

        for (index, host) in self.hosts.iter().enumerate() {
            let start = Instant::now();
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                debug!("connection attempt {} to host[{}]={}", attempt, index, host);
                match self.connector.connect(host, self.timeout).await {
                    Ok(()) => {
                        info!(
                            "Connected to {} after {:.1}s",
                            host,
                            start.elapsed().as_secs_f64()
                        );
                        self.active = Some(host.clone());
                        return true;
                    }
                    Err(e) => {
                        debug!("{}", e);
                        if start.elapsed() > self.timeout {
                            warn!("Timed out connecting to {} after {:?}", host, self.timeout);
                            break;
                        }
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        warn!(
            "{}",
            RemoteError::Exhausted {
                hosts: self.hosts.clone()
            }
        );
        false
    }

    /// Runs a command on the connected host.
    ///
    /// stdout and stderr are drained concurrently until both reach EOF, so a
    /// command that interleaves large amounts of output on both channels
    /// cannot stall; only then is the exit status collected.
    pub async fn exec(&mut self, command: &str) -> Result<RemoteResponse, RemoteError> {
        let host = self.active.clone().ok_or(RemoteError::NotConnected)?;

        let mut child = self
            .connector
            .command(&host, command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RemoteError::Spawn(e.to_string()))?;

        let mut out_pipe = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::Spawn("stdout not captured".to_string()))?;
        let mut err_pipe = child
            .stderr
            .take()
            .ok_or_else(|| RemoteError::Spawn("stderr not captured".to_string()))?;

        let mut out_buf = [0u8; 4096];
        let mut err_buf = [0u8; 4096];
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut out_done = false;
        let mut err_done = false;

        while !(out_done && err_done) {
            tokio::select! {
                read = out_pipe.read(&mut out_buf), if !out_done => {
                    let n = read?;
                    if n == 0 {
                        out_done = true;
                    } else {
                        stdout.extend_from_slice(&out_buf[..n]);
                        if let Some(sink) = self.stdout_sink.as_mut() {
                            sink.write_all(&out_buf[..n])?;
                        }
                    }
                }
                read = err_pipe.read(&mut err_buf), if !err_done => {
                    let n = read?;
                    if n == 0 {
                        err_done = true;
                    } else {
                        stderr.extend_from_slice(&err_buf[..n]);
                        if let Some(sink) = self.stderr_sink.as_mut() {
                            sink.write_all(&err_buf[..n])?;
                        }
                    }
                }
            }
        }
        for sink in [self.stdout_sink.as_mut(), self.stderr_sink.as_mut()]
            .into_iter()
            .flatten()
        {
            sink.flush()?;
        }

        let status = child.wait().await?;
        let response = RemoteResponse {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };
        info!("{} [RETURN CODE={}]", command, response.exit_code);
        Ok(response)
    }

    /// Drops the connection.
    pub fn close(&mut self) {
        if let Some(host) = self.active.take() {
            debug!("Closed session to {}", host);
        }
        self.stdout_sink = None;
        self.stderr_sink = None;
    }
}

/// Splits "a, b,,c" into ["a", "b", "c"].
pub fn parse_host_list(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::process::Command;

    /// Refuses every host except `accept`, which runs commands locally via `sh`.
    struct LocalConnector {
        accept: String,
        attempts: Arc<AtomicU32>,
    }

    impl LocalConnector {
        fn accepting(host: &str) -> Self {
            Self {
                accept: host.to_string(),
                attempts: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl HostConnector for LocalConnector {
        async fn connect(&self, host: &str, _timeout: Duration) -> Result<(), RemoteError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if host == self.accept {
                Ok(())
            } else {
                Err(RemoteError::Refused {
                    host: host.to_string(),
                    reason: "connection refused".to_string(),
                })
            }
        }

        fn command(&self, _host: &str, remote_command: &str) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(remote_command);
            cmd
        }
    }

    fn session(connector: LocalConnector, hosts: &str) -> RemoteSession<LocalConnector> {
        RemoteSession::from_host_list(connector, hosts)
            .with_timeout(Duration::from_millis(100))
            .with_retry_delay(Duration::from_millis(10))
    }

    #[test]
    fn test_parse_host_list() {
        assert_eq!(parse_host_list(" a, b,,c "), vec!["a", "b", "c"]);
        assert!(parse_host_list("").is_empty());
    }

    #[tokio::test]
    async fn test_failover_to_second_host() {
        let connector = LocalConnector::accepting("b");
        let attempts = connector.attempts.clone();
        let mut session = session(connector, "a,b");

        assert!(session.connect().await);
        assert_eq!(session.active_host(), Some("b"));
        // Host a was retried until its timeout before moving on.
        assert!(attempts.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn test_all_hosts_exhausted() {
        let mut session = session(LocalConnector::accepting("z"), "a,b");
        assert!(!session.connect().await);
        assert!(!session.is_connected());
        assert!(matches!(
            session.exec("true").await,
            Err(RemoteError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_no_hosts() {
        let mut session = session(LocalConnector::accepting("a"), "");
        assert!(!session.connect().await);
    }

    #[tokio::test]
    async fn test_exec_reports_exit_code_and_both_channels() {
        let mut session = session(LocalConnector::accepting("a"), "a");
        assert!(session.connect().await);

        let response = session
            .exec("echo listing; echo warning >&2; exit 4")
            .await
            .unwrap();
        assert_eq!(response.exit_code, 4);
        assert!(!response.success());
        assert_eq!(response.stdout, "listing\n");
        assert_eq!(response.stderr, "warning\n");
    }

    #[tokio::test]
    async fn test_exec_drains_interleaved_output() {
        let mut session = session(LocalConnector::accepting("a"), "a");
        assert!(session.connect().await);

        let script = "i=0; while [ $i -lt 20000 ]; do echo out$i; echo err$i >&2; i=$((i+1)); done";
        let response = session.exec(script).await.unwrap();
        assert!(response.success());
        assert_eq!(response.stdout.lines().count(), 20_000);
        assert_eq!(response.stderr.lines().count(), 20_000);
    }

    #[tokio::test]
    async fn test_exec_tees_to_output_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let out = temp.path().join("out.txt");
        let err = temp.path().join("err.txt");

        let mut session = session(LocalConnector::accepting("a"), "a");
        session.set_output_files(&out, &err).unwrap();
        assert!(session.connect().await);
        session.exec("echo hello; echo problem >&2").await.unwrap();
        session.close();

        assert_eq!(std::fs::read_to_string(out).unwrap(), "hello\n");
        assert_eq!(std::fs::read_to_string(err).unwrap(), "problem\n");
    }
}
