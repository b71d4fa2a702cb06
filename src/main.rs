use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use chrono::{Duration, Local};
use clap::{Parser, Subcommand};
use tracing::Instrument;
use tracing_appender::non_blocking::WorkerGuard;

mod config;
mod db;
mod error;
mod google_auth;
mod logging;
mod models;
mod normalize;
mod passback;
mod pipeline;
mod retention;
mod sheets;
mod source;
mod stats;

use crate::config::Config;
use crate::error::Result;
use crate::logging::LogConfig;
use crate::pipeline::{RunOptions, RunOutcome};
use crate::retention::RetentionStats;

#[derive(Parser)]
#[command(name = "attempt-stats-etl")]
#[command(about = "Loads attempt statistics into Postgres and publishes a daily report", long_about = None)]
struct Cli {
    /// Log file, trimmed to the last three days on every start
    #[arg(long, default_value = "logs.txt")]
    log_file: PathBuf,

    /// Statistics API parameters (JSON object); overrides PARAMS_FILE
    #[arg(long)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, store, aggregate and publish
    Run {
        /// Fetch and aggregate without writing to the database or spreadsheet
        #[arg(long)]
        dry_run: bool,
        /// Store rows but do not publish the report
        #[arg(long)]
        skip_report: bool,
    },
    /// Create the Users table if it does not exist
    InitDb,
    /// Only trim the log file
    PruneLogs,
    /// Print the aggregate over every attempt stored in Users as JSON
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (_guard, retention) = match prepare_logging(&cli.log_file) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let run_id = uuid::Uuid::new_v4();
    let code = run_command(cli.command, cli.params, retention)
        .instrument(tracing::info_span!("run", %run_id))
        .await;

    ExitCode::from(code)
}

async fn run_command(
    command: Commands,
    params: Option<PathBuf>,
    retention: std::io::Result<RetentionStats>,
) -> u8 {
    match retention {
        Ok(stats) => tracing::info!(
            kept = stats.kept,
            dropped = stats.dropped,
            orphaned = stats.orphaned,
            "log retention applied"
        ),
        Err(e) => {
            tracing::warn!(error = %e, "log retention failed");
            if matches!(command, Commands::PruneLogs) {
                return 2;
            }
        }
    }

    match execute(command, params).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(kind = ?e.kind(), error = %e, "run aborted");
            e.exit_code()
        }
    }
}

/// Trims the log before the file appender opens it, then installs tracing.
fn prepare_logging(
    log_file: &Path,
) -> anyhow::Result<(WorkerGuard, std::io::Result<RetentionStats>)> {
    let retention = retention::prune_log(
        log_file,
        Local::now().naive_local(),
        Duration::days(retention::RETENTION_DAYS),
    );

    let guard = logging::init_tracing(&LogConfig {
        log_file: log_file.to_path_buf(),
        ..LogConfig::default()
    })
    .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    Ok((guard, retention))
}

async fn execute(command: Commands, params: Option<PathBuf>) -> Result<u8> {
    match command {
        Commands::PruneLogs => Ok(0),
        Commands::InitDb => {
            let config = Config::from_env();
            let store = db::AttemptStore::connect(&config).await?;
            let result = store.ensure_schema().await;
            store.close().await;
            result?;
            tracing::info!("schema ready");
            Ok(0)
        }
        Commands::Stats => {
            let config = Config::from_env();
            let store = db::AttemptStore::connect(&config).await?;
            let rows = store.fetch_all().await;
            store.close().await;
            let rows = rows?;

            let snapshot = stats::compute(&rows);
            tracing::info!(rows = rows.len(), "aggregate computed over stored attempts");
            let rendered = serde_json::to_string_pretty(&snapshot)
                .map_err(|e| error::EtlError::Decode(e.to_string()))?;
            println!("{rendered}");
            Ok(0)
        }
        Commands::Run {
            dry_run,
            skip_report,
        } => {
            let mut config = Config::from_env();
            if let Some(path) = params {
                config.params_file = path;
            }

            tracing::info!(dry_run, skip_report, "starting run");
            let summary = pipeline::run(
                &config,
                RunOptions {
                    dry_run,
                    skip_report,
                },
            )
            .await?;

            tracing::info!(
                fetched = summary.fetched,
                normalized = summary.normalized,
                rejected = summary.rejected,
                inserted = summary.inserted,
                attempts = summary.snapshot.attempts,
                outcome = ?summary.outcome,
                "run finished"
            );
            if summary.outcome == RunOutcome::Degraded {
                tracing::warn!("run finished without publishing the report");
            }
            Ok(summary.outcome.exit_code())
        }
    }
}
