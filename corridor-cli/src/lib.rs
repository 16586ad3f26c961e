//! Command-line interface for the corridor consolidation engine.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use corridor_core::RunOutcome;
use tracing_subscriber::EnvFilter;

mod consolidate;
mod error;

pub use error::CliError;

use consolidate::{ConsolidateArgs, run_consolidate};
#[cfg(test)]
use consolidate::{ConsolidateConfig, DistanceUnit, execute, resolve_consolidate_config};

const ARG_INPUT: &str = "input";
const ARG_OUTPUT: &str = "output";
const ARG_FORMAT: &str = "format";
const ARG_OVERWRITE: &str = "overwrite";
const ARG_DISTANCE: &str = "distance";
const ARG_DISTANCE_UNIT: &str = "distance-unit";
const ARG_PLANNING_DISTANCE: &str = "planning-distance";
const ARG_WORKING_CRS: &str = "working-crs";
const ARG_FALLBACK_CRS: &str = "fallback-crs";
const ARG_WORKERS: &str = "workers";
const ARG_BATCH_SIZE: &str = "batch-size";
const ARG_FAIL_FAST: &str = "fail-fast";
const ARG_DRY_RUN: &str = "dry-run";
const ARG_CAP: &str = "cap";
const ARG_JOIN: &str = "join";
const ARG_BASE_LAYER: &str = "base-layer";
const ARG_PLANNING_LAYER: &str = "planning-layer";
const ARG_EXCLUSION_LAYER: &str = "exclusion-layer";
const ARG_AUDIT_DB: &str = "audit-db";
const ARG_SUMMARY: &str = "summary";
const ENV_INPUT: &str = "CORRIDOR_CMDS_CONSOLIDATE_INPUT";
const ENV_OUTPUT: &str = "CORRIDOR_CMDS_CONSOLIDATE_OUTPUT";

/// Install the stderr log formatter.
///
/// `RUST_LOG` selects the level, defaulting to `info`. Records emitted
/// through the `log` facade by the library crates are forwarded too.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("corridor: logging unavailable: {err}");
    }
}

/// Run the corridor CLI with the current process arguments and environment.
pub fn run() -> Result<RunOutcome, CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Consolidate(args) => Ok(run_consolidate(args)?.outcome),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "corridor",
    about = "Consolidate infrastructure reports into a single buffered corridor",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract, buffer and merge every report in a folder.
    Consolidate(ConsolidateArgs),
}

#[cfg(test)]
mod tests;
