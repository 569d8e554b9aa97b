//! Extraction cycle orchestration: cursors, concurrent family fetches, run
//! reports, findings submission and the cron scheduler.

pub mod archive;
pub mod config;
pub mod merge;
pub mod pipeline;
pub mod scheduler;

use std::sync::Arc;

use anyhow::{Context, Result};
use tlx_storage::{PgAnalytics, PgLedger};

pub use archive::{FamilyReport, FamilyStatus, RunReport, SnapshotManifest};
pub use config::{load_family_registry, ExtractConfig, FamilyEntry, FamilyRegistry};
pub use merge::{build_processed_trades, submit, SubmitError};
pub use pipeline::{earliest_cutoff, CycleSummary, ExtractionOutcome, ExtractionPipeline, SubmitSummary};
pub use scheduler::maybe_build_scheduler;

pub const CRATE_NAME: &str = "tlx-sync";

pub type PgPipeline = ExtractionPipeline<PgLedger, PgAnalytics>;

/// Connects both stores with the configured pool size.
pub async fn connect_pipeline(config: ExtractConfig) -> Result<PgPipeline> {
    let ledger_pool = tlx_storage::connect(&config.ledger_database_url, config.max_connections)
        .await
        .context("connecting to ledger database")?;
    let analytics_pool =
        tlx_storage::connect(&config.analytics_database_url, config.max_connections)
            .await
            .context("connecting to analytics database")?;
    Ok(ExtractionPipeline::new(
        config,
        Arc::new(PgLedger::new(ledger_pool)),
        Arc::new(PgAnalytics::new(analytics_pool)),
    ))
}

pub async fn pipeline_from_env() -> Result<PgPipeline> {
    connect_pipeline(ExtractConfig::from_env()).await
}
