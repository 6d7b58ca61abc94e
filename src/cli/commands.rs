//! CLI command definitions for the nightly transfer tool.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use crate::logging::RunLogFile;
use crate::pipeline::{
    Mjd, PipelineController, PipelineError, Stage, StageSelection, TransferConfig,
    DEFAULT_LOG_DIR,
};
use crate::storage::{aggregate_across_runs, CompressedRunStatus, Dashboard};

/// Exit code when a stage failed.
const EXIT_FAILURE: u8 = 1;

/// Exit code when a child was killed at the executor ceiling.
const EXIT_ABORTED: u8 = 2;

/// Nightly observatory data transfer.
#[derive(Parser, Debug)]
#[command(name = "transfer")]
#[command(about = "Transfer a night of observatory data through download, verify, copy, mirror and backup")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Shorthand for `--log-level debug`.
    #[arg(short, long, global = true)]
    pub debug: bool,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run the transfer pipeline for one night.
    Run(RunArgs),

    /// Show the per-night status table and optionally render the dashboard.
    Status(StatusArgs),
}

/// Which deployment to act on.
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Observatory (apo or lco).
    #[arg(short = 'O', long, env = "OBSERVATORY", default_value = "apo")]
    pub observatory: String,

    /// Instrument mode (mos or lvm).
    #[arg(short = 'I', long, value_parser = ["mos", "lvm"])]
    pub mode: Option<String>,

    /// Log directory name under the staging root.
    #[arg(short = 'L', long, default_value = DEFAULT_LOG_DIR)]
    pub log_dir: String,
}

/// Arguments for `transfer run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: Target,

    /// Night to process; defaults to the current MJD.
    #[arg(short = 'm', long)]
    pub mjd: Option<Mjd>,

    /// Directory holding `transfer.<obs>[_<mode>].yaml` (overrides TRANSFER_INI_DIR).
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Only transfer these sections.
    #[arg(short = 'i', long = "include", conflicts_with = "exclude")]
    pub include: Vec<String>,

    /// Transfer every section except these.
    #[arg(short = 'e', long = "exclude")]
    pub exclude: Vec<String>,

    /// Run the report stage.
    #[arg(short = 'R', long)]
    pub report: bool,

    /// Run the download stage.
    #[arg(short = 'D', long)]
    pub download: bool,

    /// Run the verify stage.
    #[arg(short = 'V', long)]
    pub verify: bool,

    /// Run the copy stage.
    #[arg(short = 'C', long)]
    pub copy: bool,

    /// Run the mirror stage.
    #[arg(short = 'M', long)]
    pub mirror: bool,

    /// Run the backup stage.
    #[arg(short = 'B', long)]
    pub backup: bool,
}

impl RunArgs {
    /// Stage flags as a selection; no flag at all selects every stage.
    pub fn selection(&self) -> StageSelection {
        StageSelection {
            report: self.report,
            download: self.download,
            verify: self.verify,
            copy: self.copy,
            mirror: self.mirror,
            backup: self.backup,
        }
        .or_all()
    }
}

/// Arguments for `transfer status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: Target,

    /// Also render `index.html` in the log directory.
    #[arg(long)]
    pub render: bool,

    /// Directory holding a custom `index.html` template.
    #[arg(long, env = "TRANSFER_TEMPLATE_DIR")]
    pub template_dir: Option<PathBuf>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
///
/// `run_log` receives the per-run log file once the run directory exists.
pub async fn run_with_cli(cli: Cli, run_log: RunLogFile) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args, run_log).await,
        Commands::Status(args) => run_status_command(args),
    }
}

async fn run_pipeline_command(args: RunArgs, run_log: RunLogFile) -> anyhow::Result<ExitCode> {
    let target = &args.target;
    let mut config = TransferConfig::load(
        &target.observatory,
        target.mode.as_deref(),
        args.config_dir.as_deref(),
    )
    .context("Failed to load transfer configuration")?
    .with_log_dir(target.log_dir.clone());
    config
        .filter_sections(&args.include, &args.exclude)
        .context("Invalid section selection")?;

    let mjd = args.mjd.unwrap_or_else(Mjd::today);
    let selection = args.selection();
    info!(
        "Transfer {} MJD {} stages [{}]",
        config.label(),
        mjd,
        selection
            .enabled()
            .iter()
            .map(Stage::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut controller = PipelineController::new(config, selection).with_run_log(run_log);
    match controller.run(mjd).await {
        Ok(report) => {
            for (stage, status) in report.state.completed() {
                println!("{:<10} {}", stage, status);
            }
            if let Some(logfile) = &report.logfile {
                println!("report     {}", logfile);
            }
            if report.success() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_FAILURE))
            }
        }
        Err(PipelineError::InstanceInUse { pid, mjd }) => {
            warn!("Transfer for {} already running as pid {}; nothing to do", mjd, pid);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_fatal() => {
            error!(critical = true, "Transfer aborted: {}", e);
            Ok(ExitCode::from(EXIT_ABORTED))
        }
        Err(e) => Err(e).context("Transfer failed"),
    }
}

fn run_status_command(args: StatusArgs) -> anyhow::Result<ExitCode> {
    let target = &args.target;
    let staging_var = format!("{}_STAGING_DATA", target.observatory.to_uppercase());
    let staging = std::env::var_os(&staging_var)
        .map(PathBuf::from)
        .with_context(|| format!("{} is not set", staging_var))?;
    let log_root = staging.join(&target.log_dir);

    let histories = aggregate_across_runs(&log_root, None);
    print!("{}", format_status_table(&histories));

    if args.render {
        let path = Dashboard::new(&log_root, &target.observatory, target.mode.as_deref())
            .with_template_dir(args.template_dir.clone())
            .write(&histories)
            .context("Failed to render dashboard")?;
        println!("Wrote {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

/// One line per night: the MJD, then the latest status of every stage.
pub fn format_status_table(histories: &[CompressedRunStatus]) -> String {
    let mut out = format!("{:<7}", "mjd");
    for stage in Stage::ALL {
        out.push_str(&format!(" {:<10}", stage));
    }
    out.push_str(" report-log\n");

    for run in histories {
        out.push_str(&format!("{:<7}", run.date));
        for stage in Stage::ALL {
            let cell = run
                .latest(stage)
                .map(|entry| entry.status.to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(" {:<10}", cell));
        }
        out.push_str(&format!(" {}\n", run.logfile.as_deref().unwrap_or("")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageStatus;
    use crate::storage::{compress, RunStatus};

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "transfer", "run", "-m", "60000", "-O", "lco", "-I", "lvm", "-D", "-V", "-i", "lvm",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mjd, Some(Mjd(60000)));
        assert_eq!(args.target.observatory, "lco");
        assert_eq!(args.target.mode.as_deref(), Some("lvm"));
        assert_eq!(args.include, vec!["lvm"]);
        assert_eq!(args.selection(), StageSelection::only(&[Stage::Download, Stage::Verify]));
    }

    #[test]
    fn test_no_stage_flags_select_all() {
        let cli = Cli::try_parse_from(["transfer", "run", "-O", "apo"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.selection(), StageSelection::all());
    }

    #[test]
    fn test_include_and_exclude_conflict() {
        let result = Cli::try_parse_from(["transfer", "run", "-i", "a", "-e", "b"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_status_table() {
        let mut status = RunStatus::new(Mjd(60000));
        status.history.push(crate::storage::HistoryEntry {
            stage: Stage::Download,
            status: StageStatus::Success,
            timestamp: chrono::Utc::now(),
        });
        let table = format_status_table(&[compress(&status)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("mjd"));
        assert!(lines[1].starts_with("60000"));
        assert!(lines[1].contains("success"));
    }
}
