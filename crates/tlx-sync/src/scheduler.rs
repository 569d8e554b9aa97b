use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use tlx_storage::{CursorStore, LedgerSource, TradeSink};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::pipeline::ExtractionPipeline;

/// Builds a scheduler running today's cycle on `TLX_EXTRACT_CRON`, or `None`
/// when scheduling is disabled. The caller starts it.
pub async fn maybe_build_scheduler<L, A>(
    pipeline: Arc<ExtractionPipeline<L, A>>,
) -> Result<Option<JobScheduler>>
where
    L: LedgerSource + 'static,
    A: CursorStore + TradeSink + 'static,
{
    if !pipeline.config().scheduler_enabled {
        return Ok(None);
    }

    let cron = pipeline.config().extract_cron.clone();
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            let trade_date = Local::now().date_naive();
            match pipeline.run_cycle(trade_date).await {
                Ok(summary) => info!(
                    run_id = %summary.report.run_id,
                    failed = summary.report.failed_families().len(),
                    "scheduled cycle finished"
                ),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled cycle failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
