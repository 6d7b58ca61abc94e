//! transfer CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments first to get log_level
    let cli = transfer::cli::parse_cli();

    // Priority: RUST_LOG env var > --debug > --log-level CLI arg > default "info"
    let run_log = transfer::logging::init(&cli.log_level, cli.debug);

    transfer::cli::run_with_cli(cli, run_log).await
}
