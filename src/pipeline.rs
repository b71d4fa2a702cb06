//! Ordered execution of one ETL run: fetch, normalize, store, aggregate,
//! publish.

use tracing::Instrument;

use crate::config::{self, Config};
use crate::db::AttemptStore;
use crate::error::Result;
use crate::models::AggregateSnapshot;
use crate::normalize::normalize;
use crate::sheets;
use crate::source::StatisticsClient;
use crate::stats;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Fetch and aggregate only; nothing is written anywhere.
    pub dry_run: bool,
    pub skip_report: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Data was stored but the report could not be published.
    Degraded,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Degraded => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fetched: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub inserted: u64,
    pub snapshot: AggregateSnapshot,
    pub outcome: RunOutcome,
}

/// Runs every stage in order. Any stage error before publishing aborts the
/// run; the database connection is closed on every path once opened.
pub async fn run(config: &Config, options: RunOptions) -> Result<RunSummary> {
    let params = config::load_params(&config.params_file)?;

    let store = if options.dry_run {
        None
    } else {
        let store = AttemptStore::connect(config)
            .instrument(tracing::info_span!("stage", name = "connect"))
            .await?;
        tracing::info!("database connection established");
        Some(store)
    };

    let result = run_stages(config, &params, store.as_ref(), options).await;

    if let Some(store) = store {
        store.close().await;
        tracing::info!("database connection closed");
    }

    result
}

async fn run_stages(
    config: &Config,
    params: &[(String, String)],
    store: Option<&AttemptStore>,
    options: RunOptions,
) -> Result<RunSummary> {
    if let Some(store) = store {
        store
            .ensure_schema()
            .instrument(tracing::info_span!("stage", name = "schema"))
            .await?;
    }

    let client = StatisticsClient::new(
        &config.stats_api_url,
        config.http_timeout,
        config.http_max_attempts,
    )?;
    let records = client
        .fetch(params)
        .instrument(tracing::info_span!("stage", name = "fetch"))
        .await?;

    let normalized = {
        let _span = tracing::info_span!("stage", name = "normalize").entered();
        let normalized = normalize(&records);
        if let Some(first) = normalized.rejected.first() {
            tracing::warn!(
                rejected = normalized.rejected.len(),
                total = records.len(),
                first_index = first.index,
                first_reason = %first.reason,
                "some attempt records were malformed and skipped"
            );
        }
        tracing::info!(rows = normalized.rows.len(), "records normalized");
        normalized
    };

    let inserted = match store {
        Some(store) => {
            let inserted = store
                .append(&normalized.rows)
                .instrument(tracing::info_span!("stage", name = "store"))
                .await?;
            tracing::info!(inserted, "rows committed to Users");
            inserted
        }
        None => 0,
    };

    let snapshot = stats::compute(&normalized.rows);
    tracing::info!(
        attempts = snapshot.attempts,
        success = snapshot.success,
        count_users = snapshot.count_users,
        morning = snapshot.time_of_day.morning,
        afternoon = snapshot.time_of_day.afternoon,
        evening = snapshot.time_of_day.evening,
        "aggregate computed"
    );

    let outcome = if options.dry_run || options.skip_report {
        RunOutcome::Completed
    } else {
        match sheets::publish_report(config, &snapshot)
            .instrument(tracing::info_span!("stage", name = "publish"))
            .await
        {
            Ok(()) => RunOutcome::Completed,
            Err(e) => {
                tracing::error!(error = %e, "report was not published");
                RunOutcome::Degraded
            }
        }
    };

    Ok(RunSummary {
        fetched: records.len(),
        normalized: normalized.rows.len(),
        rejected: normalized.rejected.len(),
        inserted,
        snapshot,
        outcome,
    })
}
