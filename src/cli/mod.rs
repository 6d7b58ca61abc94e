//! Command-line interface for the nightly transfer tool.
//!
//! Provides `transfer run` for the pipeline and `transfer status` for the
//! cross-night status table.

mod commands;

pub use commands::{
    format_status_table, parse_cli, run_with_cli, Cli, Commands, RunArgs, StatusArgs, Target,
};
