//! Single-instance guard keyed by MJD.
//!
//! A pid file under the executor's pid directory records which process is
//! working on a night. A second invocation for the same night finds a live
//! owner and reports not-ready; a stale file is replaced.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::process::{CommandSpec, ProcessExecutor};
use crate::error::ExecutorError;
use crate::pipeline::Mjd;

/// Result of trying to claim a night for this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceClaim {
    /// This process now owns the pid file.
    Claimed { pid_file: PathBuf },
    /// Another live process owns the night.
    InUse { pid: u32, pid_file: PathBuf },
}

impl InstanceClaim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, InstanceClaim::Claimed { .. })
    }
}

impl ProcessExecutor {
    /// Path of the pid file guarding `mjd`.
    pub fn pid_file(&self, mjd: Mjd) -> PathBuf {
        self.config().pid_dir.join(format!("{}.pid", mjd))
    }

    /// Claims `mjd` for the current process unless a live instance owns it.
    ///
    /// Liveness is checked with `ps -o command= <pid>`: the recorded pid only
    /// counts as an owner if its command line mentions this program.
    pub async fn claim_instance(&self, mjd: Mjd) -> Result<InstanceClaim, ExecutorError> {
        let pid_file = self.pid_file(mjd);
        if let Some(parent) = pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if let Some(pid) = read_pid(&pid_file) {
            if self.pid_in_use(pid).await? {
                info!("Found running pid {} in {}", pid, pid_file.display());
                return Ok(InstanceClaim::InUse { pid, pid_file });
            }
            debug!("Removing stale pid file {}", pid_file.display());
            if let Err(e) = std::fs::remove_file(&pid_file) {
                warn!("Failed to remove stale {}: {}", pid_file.display(), e);
            }
        }

        std::fs::write(&pid_file, format!("{}\n", std::process::id()))?;
        debug!("Adding new pid in {}", pid_file.display());
        Ok(InstanceClaim::Claimed { pid_file })
    }

    /// Removes the pid file if it still names this process.
    pub fn release_instance(&self, mjd: Mjd) {
        let pid_file = self.pid_file(mjd);
        if read_pid(&pid_file) == Some(std::process::id()) {
            if let Err(e) = std::fs::remove_file(&pid_file) {
                warn!("Failed to remove {}: {}", pid_file.display(), e);
            }
        }
    }

    async fn pid_in_use(&self, pid: u32) -> Result<bool, ExecutorError> {
        if pid == std::process::id() {
            return Ok(false);
        }
        let cmd = CommandSpec::new("ps").args(["-o", "command="]).arg(pid.to_string());
        let outcome = match self.run_ignoring_errors(&cmd).await {
            Ok(outcome) => outcome.check_aborted(&cmd)?,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Could not check pid {}: {}", pid, e);
                return Ok(false);
            }
        };
        Ok(outcome.exit_code == 0 && outcome.stdout.contains(&self.config().program))
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().find_map(|line| line.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn executor(pid_dir: &Path, program: &str) -> ProcessExecutor {
        ProcessExecutor::new(
            ExecutorConfig::new()
                .with_program(program)
                .with_pid_dir(pid_dir)
                .with_min_poll(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_claim_writes_current_pid() {
        let temp = TempDir::new().unwrap();
        let executor = executor(temp.path(), "transfer");
        let claim = executor.claim_instance(Mjd(60000)).await.unwrap();
        assert!(claim.is_claimed());

        let pid = read_pid(&temp.path().join("60000.pid"));
        assert_eq!(pid, Some(std::process::id()));

        executor.release_instance(Mjd(60000));
        assert!(!temp.path().join("60000.pid").exists());
    }

    #[tokio::test]
    async fn test_stale_pid_file_is_replaced() {
        let temp = TempDir::new().unwrap();
        // A pid that cannot exist on Linux (above pid_max).
        std::fs::write(temp.path().join("60001.pid"), "99999999\n").unwrap();

        let executor = executor(temp.path(), "transfer");
        let claim = executor.claim_instance(Mjd(60001)).await.unwrap();
        assert!(claim.is_claimed());
        assert_eq!(
            read_pid(&temp.path().join("60001.pid")),
            Some(std::process::id())
        );
    }

    #[tokio::test]
    async fn test_live_owner_blocks_claim() {
        let temp = TempDir::new().unwrap();
        let mut owner = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let owner_pid = owner.id().unwrap();
        std::fs::write(temp.path().join("60002.pid"), format!("{}\n", owner_pid)).unwrap();

        let executor = executor(temp.path(), "sleep");
        let claim = executor.claim_instance(Mjd(60002)).await.unwrap();
        owner.kill().await.unwrap();

        assert_eq!(
            claim,
            InstanceClaim::InUse {
                pid: owner_pid,
                pid_file: temp.path().join("60002.pid"),
            }
        );
    }
}
