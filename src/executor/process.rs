//! Bounded external command execution.
//!
//! Commands are started asynchronously and polled with an interval that
//! widens with elapsed time, so a quick `test -d` returns within a second
//! while a multi-hour rsync is checked only every few minutes. A hard
//! wall-clock ceiling kills hung children.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::{debug, error};

use crate::error::ExecutorError;

/// Default ceiling: a little under six days.
pub const DEFAULT_CEILING: Duration = Duration::from_secs(500_000);

/// Default lower bound on the poll interval.
pub const DEFAULT_MIN_POLL: Duration = Duration::from_secs(1);

/// An external command as an explicit argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    stdin_file: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdin_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Runs the command from the given working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Feeds the command's stdin from a batch file, when that file exists.
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_file = Some(path.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Rejects commands that cannot be passed to the OS verbatim.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        if self.program.trim().is_empty() {
            return Err(ExecutorError::InvalidCommand("empty program".to_string()));
        }
        if let Some(bad) = std::iter::once(&self.program)
            .chain(self.args.iter())
            .find(|part| part.contains('\0'))
        {
            return Err(ExecutorError::InvalidCommand(format!(
                "NUL byte in argument {:?}",
                bad
            )));
        }
        Ok(())
    }

    fn to_command(&self) -> Result<Command, ExecutorError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        match &self.stdin_file {
            Some(path) if path.exists() => {
                cmd.stdin(Stdio::from(File::open(path)?));
            }
            _ => {
                cmd.stdin(Stdio::null());
            }
        }
        Ok(cmd)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// True when the ceiling fired and the child was killed.
    pub aborted: bool,
    pub elapsed: Duration,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        !self.aborted && self.exit_code == 0
    }

    /// Converts an aborted outcome into the fatal [`ExecutorError::Aborted`].
    pub fn check_aborted(self, command: &CommandSpec) -> Result<Self, ExecutorError> {
        if self.aborted {
            Err(ExecutorError::Aborted {
                command: command.to_string(),
                elapsed: self.elapsed,
            })
        } else {
            Ok(self)
        }
    }
}

/// Tunables for [`ProcessExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name of this program, used for the instance guard.
    pub program: String,
    /// Elapsed time after which a child is killed.
    pub ceiling: Duration,
    /// Lower bound on the poll interval.
    pub min_poll: Duration,
    /// Directory holding per-MJD pid files.
    pub pid_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "transfer".to_string());
        Self {
            program: "transfer".to_string(),
            ceiling: DEFAULT_CEILING,
            min_poll: DEFAULT_MIN_POLL,
            pid_dir: PathBuf::from("/tmp").join(user).join("transfer"),
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_min_poll(mut self, min_poll: Duration) -> Self {
        self.min_poll = min_poll;
        self
    }

    pub fn with_pid_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pid_dir = dir.into();
        self
    }
}

/// Runs external commands with full output capture and a hard ceiling.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    config: ExecutorConfig,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs a command; non-zero exits are logged at error level.
    pub async fn run(&self, command: &CommandSpec) -> Result<ExecOutcome, ExecutorError> {
        self.execute(command, false).await
    }

    /// Runs a command whose non-zero exit is expected and logged at debug level.
    pub async fn run_ignoring_errors(
        &self,
        command: &CommandSpec,
    ) -> Result<ExecOutcome, ExecutorError> {
        self.execute(command, true).await
    }

    /// Runs a command to completion or until the ceiling fires.
    ///
    /// stdout and stderr are spooled to anonymous temporary files so that a
    /// chatty child can never block on a full pipe while we sleep between
    /// polls. Both are returned in full.
    pub async fn execute(
        &self,
        command: &CommandSpec,
        ignore_error: bool,
    ) -> Result<ExecOutcome, ExecutorError> {
        command.validate()?;
        debug!("{}", command);

        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        let mut cmd = command.to_command()?;
        cmd.stdout(Stdio::from(stdout.try_clone()?));
        cmd.stderr(Stdio::from(stderr.try_clone()?));
        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: command.program().to_string(),
            source,
        })?;

        let start = Instant::now();
        let mut aborted = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            let elapsed = start.elapsed();
            if elapsed > self.config.ceiling {
                aborted = true;
                child.kill().await?;
                break child.try_wait()?;
            }
            tokio::time::sleep(poll_interval(elapsed, self.config.min_poll)).await;
        };

        let outcome = ExecOutcome {
            exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
            stdout: read_spool(&mut stdout)?,
            stderr: read_spool(&mut stderr)?,
            aborted,
            elapsed: start.elapsed(),
        };

        if outcome.exit_code != 0 {
            if ignore_error {
                debug!("command return code {}", outcome.exit_code);
            } else {
                error!("command return code {}", outcome.exit_code);
            }
            if !outcome.stdout.is_empty() {
                debug!("STDOUT:\n{}", outcome.stdout);
            }
            if !outcome.stderr.is_empty() {
                debug!("STDERR:\n{}", outcome.stderr);
            }
        }
        if outcome.aborted {
            error!(
                critical = true,
                "Process still running after {:?}: {}", self.config.ceiling, command
            );
        }

        Ok(outcome)
    }

    /// Starts a command without waiting, appending stdout and stderr to `log`.
    pub fn spawn_logged(&self, command: &CommandSpec, log: &Path) -> Result<Child, ExecutorError> {
        command.validate()?;
        debug!("{}", command);
        let out = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)?;
        let err = out.try_clone()?;
        let mut cmd = command.to_command()?;
        cmd.stdout(Stdio::from(out));
        cmd.stderr(Stdio::from(err));
        cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: command.program().to_string(),
            source,
        })
    }
}

/// Poll interval for a child that has been running for `elapsed`.
///
/// The interval is one tenth of the current order of magnitude of the
/// elapsed time (10^(floor(log10(s)) - 1) seconds), never below `floor`.
pub fn poll_interval(elapsed: Duration, floor: Duration) -> Duration {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return floor;
    }
    let exponent = seconds.log10().floor() as i32 - 1;
    let interval = Duration::from_secs_f64(10f64.powi(exponent));
    interval.max(floor)
}

fn read_spool(file: &mut File) -> Result<String, ExecutorError> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_executor() -> ProcessExecutor {
        ProcessExecutor::new(ExecutorConfig::new().with_min_poll(Duration::from_millis(10)))
    }

    #[test]
    fn test_poll_interval_widens_with_elapsed_time() {
        let floor = Duration::from_secs(1);
        assert_eq!(poll_interval(Duration::ZERO, floor), floor);
        assert_eq!(poll_interval(Duration::from_secs(5), floor), floor);
        assert_eq!(poll_interval(Duration::from_secs(150), floor), Duration::from_secs(10));
        assert_eq!(poll_interval(Duration::from_secs(4000), floor), Duration::from_secs(100));
        assert_eq!(
            poll_interval(Duration::from_secs(200_000), floor),
            Duration::from_secs(10_000)
        );
    }

    #[test]
    fn test_command_display_and_validation() {
        let cmd = CommandSpec::new("rsync")
            .args(["--archive", "/data/a b/"])
            .arg("/dest/");
        assert_eq!(cmd.to_string(), "rsync --archive \"/data/a b/\" /dest/");
        assert!(cmd.validate().is_ok());
        assert!(CommandSpec::new(" ").validate().is_err());
        assert!(CommandSpec::new("ls").arg("a\0b").validate().is_err());
    }

    #[tokio::test]
    async fn test_execute_captures_output_and_exit_code() {
        let executor = fast_executor();
        let cmd = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let outcome = executor.run_ignoring_errors(&cmd).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout, "out\n");
        assert_eq!(outcome.stderr, "err\n");
        assert!(!outcome.aborted);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_execute_buffers_large_output() {
        let executor = fast_executor();
        let cmd = CommandSpec::new("sh").args(["-c", "seq 1 200000"]);
        let outcome = executor.run(&cmd).await.unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout.lines().count(), 200_000);
    }

    #[tokio::test]
    async fn test_execute_reads_stdin_batch_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let batch = temp.path().join("batch.txt");
        std::fs::write(&batch, "line one\nline two\n").unwrap();

        let executor = fast_executor();
        let cmd = CommandSpec::new("cat").stdin_file(&batch);
        let outcome = executor.run(&cmd).await.unwrap();
        assert_eq!(outcome.stdout, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_ceiling_kills_child() {
        let executor = ProcessExecutor::new(
            ExecutorConfig::new()
                .with_min_poll(Duration::from_millis(10))
                .with_ceiling(Duration::from_millis(100)),
        );
        let cmd = CommandSpec::new("sleep").arg("30");
        let outcome = executor.run(&cmd).await.unwrap();
        assert!(outcome.aborted);
        assert!(outcome.elapsed < Duration::from_secs(10));

        let err = outcome.check_aborted(&cmd).unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let executor = fast_executor();
        let cmd = CommandSpec::new("definitely-not-a-real-program-xyz");
        let err = executor.run(&cmd).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_spawn_logged_appends_output() {
        let temp = tempfile::TempDir::new().unwrap();
        let log = temp.path().join("stream.log");
        let executor = fast_executor();
        let cmd = CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2"]);
        let mut child = executor.spawn_logged(&cmd, &log).unwrap();
        let status = child.wait().await.unwrap();
        assert!(status.success());
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("hello"));
        assert!(content.contains("oops"));
    }
}
