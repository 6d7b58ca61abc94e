//! Download stage: pulls each section's night from its source host.
//!
//! A section is first probed with `test -d`. Present nights are pulled with
//! a single rsync, or, for sections marked `multiple`, with several rsync
//! streams each fed a round-robin share of the remote file listing.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::process::Child;
use tracing::{debug, error, info, warn};

use super::rsync::RsyncOptions;
use super::{run_checked, status_from};
use crate::error::ExecutorError;
use crate::executor::CommandSpec;
use crate::pipeline::{Mjd, RunContext, SectionConfig, StageStatus};

/// Default interval between checks on running download streams.
pub const DEFAULT_STREAM_POLL: Duration = Duration::from_secs(60);

/// Whether a section has data for the night.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
    /// The probe itself failed with this exit code.
    Unknown(i32),
}

impl Presence {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Presence::Present,
            1 => Presence::Absent,
            other => Presence::Unknown(other),
        }
    }
}

fn on_source(section: &SectionConfig, program: &str) -> CommandSpec {
    match &section.ssh {
        Some(dest) => {
            let mut cmd = CommandSpec::new("ssh");
            if let Some(port) = section.port {
                cmd = cmd.arg("-p").arg(port.to_string());
            }
            cmd.arg(dest.as_str()).arg(program)
        }
        None => CommandSpec::new(program),
    }
}

/// `[ssh [-p N] dest] test -d <path>/<mjd>`.
pub fn presence_command(section: &SectionConfig, mjd: Mjd) -> CommandSpec {
    on_source(section, "test").arg("-d").arg(section.remote_dir(mjd))
}

/// `[ssh [-p N] dest] /bin/ls -1 <path>/<mjd>`.
pub fn listing_command(section: &SectionConfig, mjd: Mjd) -> CommandSpec {
    on_source(section, "/bin/ls").arg("-1").arg(section.remote_dir(mjd))
}

/// Deals `files` round-robin into at most `streams` non-empty lists.
pub fn partition_round_robin(files: &[String], streams: usize) -> Vec<Vec<String>> {
    let streams = streams.max(1);
    let mut parts = vec![Vec::new(); streams];
    for (i, file) in files.iter().enumerate() {
        parts[i % streams].push(file.clone());
    }
    parts.retain(|part| !part.is_empty());
    parts
}

/// Waits for every stream; true only if all of them exited zero.
///
/// Children still running past `ceiling` are killed and the wait ends with
/// the fatal [`ExecutorError::Aborted`].
pub async fn join_streams(
    children: Vec<(String, Child)>,
    poll: Duration,
    ceiling: Duration,
) -> Result<bool, ExecutorError> {
    let start = Instant::now();
    let mut running: Vec<(String, Child)> = children;
    let mut all_ok = true;

    while !running.is_empty() {
        let mut still_running = Vec::with_capacity(running.len());
        for (label, mut child) in running {
            match child.try_wait()? {
                Some(status) => {
                    if status.success() {
                        debug!("Stream {} finished", label);
                    } else {
                        error!("Stream {} exited with {}", label, status);
                        all_ok = false;
                    }
                }
                None => still_running.push((label, child)),
            }
        }
        running = still_running;
        if running.is_empty() {
            break;
        }

        let elapsed = start.elapsed();
        if elapsed > ceiling {
            let labels: Vec<String> = running.iter().map(|(label, _)| label.clone()).collect();
            for (_, child) in running.iter_mut() {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill stream: {}", e);
                }
            }
            error!(critical = true, "Download streams still running after {:?}", ceiling);
            return Err(ExecutorError::Aborted {
                command: labels.join(", "),
                elapsed,
            });
        }
        tokio::time::sleep(poll).await;
    }

    Ok(all_ok)
}

/// Runs the download stage over all sections.
#[derive(Debug, Clone)]
pub struct DownloadStage {
    stream_poll: Duration,
}

impl Default for DownloadStage {
    fn default() -> Self {
        Self {
            stream_poll: DEFAULT_STREAM_POLL,
        }
    }
}

impl DownloadStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream_poll(mut self, poll: Duration) -> Self {
        self.stream_poll = poll;
        self
    }

    /// Downloads every section; a failed section fails the stage but the
    /// remaining sections are still attempted.
    pub async fn run(
        &self,
        ctx: &RunContext,
        sections: &[SectionConfig],
    ) -> Result<StageStatus, ExecutorError> {
        let mut ok = true;
        for section in sections {
            if !self.download_section(ctx, section).await? {
                error!("Download of {} failed", section.name);
                ok = false;
            }
        }
        Ok(status_from(ok))
    }

    async fn download_section(
        &self,
        ctx: &RunContext,
        section: &SectionConfig,
    ) -> Result<bool, ExecutorError> {
        let probe = presence_command(section, ctx.mjd);
        let Some(outcome) = run_checked(&ctx.executor, &probe, true).await? else {
            return Ok(false);
        };
        match Presence::from_exit_code(outcome.exit_code) {
            Presence::Present => {}
            Presence::Absent => {
                info!("No {} data for {}; skipping", section.name, ctx.mjd);
                return Ok(true);
            }
            Presence::Unknown(code) => {
                error!(
                    "Cannot tell whether {} exists (exit code {})",
                    section.remote_dir(ctx.mjd),
                    code
                );
                return Ok(false);
            }
        }

        let local = section.local_dir(ctx.staging(), ctx.mjd);
        if let Err(e) = std::fs::create_dir_all(&local) {
            error!("Cannot create {}: {}", local.display(), e);
            return Ok(false);
        }

        let streams = ctx.config.general.streams;
        if section.multiple && streams > 1 {
            self.download_streams(ctx, section, &local, streams).await
        } else {
            self.download_single(ctx, section, &local).await
        }
    }

    async fn download_single(
        &self,
        ctx: &RunContext,
        section: &SectionConfig,
        local: &Path,
    ) -> Result<bool, ExecutorError> {
        let options = RsyncOptions::for_section(section, ctx.config.general.permission);
        let command = options.command(&section.rsync_source(ctx.mjd), &format!("{}/", local.display()));
        info!("DOWNLOAD {}", section.name);
        Ok(run_checked(&ctx.executor, &command, false)
            .await?
            .is_some_and(|outcome| outcome.success()))
    }

    async fn download_streams(
        &self,
        ctx: &RunContext,
        section: &SectionConfig,
        local: &Path,
        streams: usize,
    ) -> Result<bool, ExecutorError> {
        let listing = listing_command(section, ctx.mjd);
        let Some(outcome) = run_checked(&ctx.executor, &listing, false).await? else {
            return Ok(false);
        };
        if !outcome.success() {
            return Ok(false);
        }
        let files: Vec<String> = outcome
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        if files.is_empty() {
            info!("{} is empty for {}", section.name, ctx.mjd);
            return Ok(true);
        }

        let options = RsyncOptions::for_section(section, ctx.config.general.permission);
        let source = section.rsync_source(ctx.mjd);
        let dest = format!("{}/", local.display());
        let mut ok = true;
        let mut children = Vec::new();

        let parts = partition_round_robin(&files, streams);
        info!(
            "DOWNLOAD {} ({} files, {} streams)",
            section.name,
            files.len(),
            parts.len()
        );
        for (i, part) in parts.iter().enumerate() {
            let list = stream_list_path(&ctx.run_dir, &section.name, i);
            let log = list.with_extension("log");
            if let Err(e) = std::fs::write(&list, format!("{}\n", part.join("\n"))) {
                error!("Cannot write {}: {}", list.display(), e);
                ok = false;
                continue;
            }
            let command = options.files_from_command(&list, &source, &dest);
            match ctx.executor.spawn_logged(&command, &log) {
                Ok(child) => children.push((format!("{}.{}", section.name, i), child)),
                Err(e) => {
                    error!("{}: {}", command, e);
                    ok = false;
                }
            }
        }

        let joined = join_streams(children, self.stream_poll, ctx.executor.config().ceiling).await?;
        Ok(ok && joined)
    }
}

/// `<run_dir>/download.<section>.<i>.rsync.txt`.
pub fn stream_list_path(run_dir: &Path, section: &str, index: usize) -> PathBuf {
    run_dir.join(format!("download.{}.{}.rsync.txt", section, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorConfig, ProcessExecutor};
    use crate::pipeline::TransferConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn spawn(executor: &ProcessExecutor, script: &str, log: &Path) -> Child {
        executor
            .spawn_logged(&CommandSpec::new("sh").args(["-c", script]), log)
            .unwrap()
    }

    #[test]
    fn test_presence_from_exit_code() {
        assert_eq!(Presence::from_exit_code(0), Presence::Present);
        assert_eq!(Presence::from_exit_code(1), Presence::Absent);
        assert_eq!(Presence::from_exit_code(255), Presence::Unknown(255));
    }

    #[test]
    fn test_probe_commands() {
        let remote = SectionConfig::new("apogee", "/data/apogee/")
            .with_ssh("sdss@obs")
            .with_port(2222);
        assert_eq!(
            presence_command(&remote, Mjd(60000)).to_string(),
            "ssh -p 2222 sdss@obs test -d /data/apogee/60000"
        );
        assert_eq!(
            listing_command(&remote, Mjd(60000)).to_string(),
            "ssh -p 2222 sdss@obs /bin/ls -1 /data/apogee/60000"
        );

        let local = SectionConfig::new("boss", "/data/boss");
        assert_eq!(
            presence_command(&local, Mjd(60000)).to_string(),
            "test -d /data/boss/60000"
        );
    }

    #[test]
    fn test_partition_round_robin() {
        let files: Vec<String> = (0..7).map(|i| format!("f{}", i)).collect();
        let parts = partition_round_robin(&files, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], vec!["f0", "f3", "f6"]);
        assert_eq!(parts[1], vec!["f1", "f4"]);
        assert_eq!(parts[2], vec!["f2", "f5"]);

        let few = partition_round_robin(&files[..2], 4);
        assert_eq!(few.len(), 2);
        assert_eq!(partition_round_robin(&files, 0).len(), 1);
    }

    #[tokio::test]
    async fn test_join_streams_fails_if_any_stream_fails() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::default();
        let children = vec![
            ("a.0".to_string(), spawn(&executor, "exit 0", &temp.path().join("0.log"))),
            ("a.1".to_string(), spawn(&executor, "sleep 0.2; exit 2", &temp.path().join("1.log"))),
            ("a.2".to_string(), spawn(&executor, "exit 0", &temp.path().join("2.log"))),
        ];
        let ok = join_streams(children, Duration::from_millis(20), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_join_streams_succeeds_when_all_succeed() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::default();
        let children = (0..3)
            .map(|i| {
                let log = temp.path().join(format!("{}.log", i));
                (format!("b.{}", i), spawn(&executor, "echo done", &log))
            })
            .collect();
        let ok = join_streams(children, Duration::from_millis(20), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(ok);
        let log = std::fs::read_to_string(temp.path().join("1.log")).unwrap();
        assert_eq!(log, "done\n");
    }

    #[tokio::test]
    async fn test_join_streams_kills_at_ceiling() {
        let temp = TempDir::new().unwrap();
        let executor = ProcessExecutor::default();
        let children = vec![(
            "c.0".to_string(),
            spawn(&executor, "sleep 30", &temp.path().join("0.log")),
        )];
        let err = join_streams(children, Duration::from_millis(20), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_absent_local_section_is_skipped() {
        let temp = TempDir::new().unwrap();
        let config = TransferConfig::new("apo", None, temp.path().join("staging"));
        let ctx = RunContext::new(
            Arc::new(config),
            Mjd(60000),
            temp.path().join("run"),
            Arc::new(ProcessExecutor::new(
                ExecutorConfig::new().with_min_poll(Duration::from_millis(10)),
            )),
        );
        let section = SectionConfig::new("boss", temp.path().join("source").display().to_string());
        let status = DownloadStage::new().run(&ctx, &[section.clone()]).await.unwrap();
        assert_eq!(status, StageStatus::Success);
        assert!(!section.local_dir(ctx.staging(), ctx.mjd).exists());
    }
}
