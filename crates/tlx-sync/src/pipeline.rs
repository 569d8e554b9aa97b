use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use tlx_adapters::{fetch_family, Selection};
use tlx_core::{DealFamily, DealHeader, Findings, Watermark};
use tlx_storage::{CursorStore, LedgerSource, TradeSink};
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::archive::{self, FamilyReport, FamilyStatus, RunReport};
use crate::config::{load_family_registry, ExtractConfig};
use crate::merge;

/// Cursor used when a family has never been extracted for a trade date.
pub fn earliest_cutoff() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Headers extracted for one family, with the window they were read under.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutcome {
    pub family: DealFamily,
    pub trade_date: NaiveDate,
    pub since: NaiveDateTime,
    pub cutoff: NaiveDateTime,
    pub headers: Vec<DealHeader>,
}

impl ExtractionOutcome {
    pub fn term_count(&self) -> usize {
        self.headers.iter().map(|header| header.terms.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_dir: PathBuf,
    pub report: RunReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitSummary {
    pub run_id: Uuid,
    pub written: usize,
    pub manifest: PathBuf,
}

pub struct ExtractionPipeline<L, A> {
    config: ExtractConfig,
    ledger: Arc<L>,
    analytics: Arc<A>,
}

impl<L, A> ExtractionPipeline<L, A>
where
    L: LedgerSource + 'static,
    A: CursorStore + TradeSink + 'static,
{
    pub fn new(config: ExtractConfig, ledger: Arc<L>, analytics: Arc<A>) -> Self {
        Self {
            config,
            ledger,
            analytics,
        }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    pub fn analytics(&self) -> &A {
        &self.analytics
    }

    /// Reads the family's cursor and fetches everything changed since it.
    /// The cutoff is captured before the first query so rows modified while
    /// the fetch runs are picked up by the next window.
    pub async fn extract_family(
        &self,
        family: DealFamily,
        trade_date: NaiveDate,
    ) -> Result<ExtractionOutcome> {
        extract(self.ledger.as_ref(), self.analytics.as_ref(), family, trade_date).await
    }

    pub async fn commit(&self, outcome: &ExtractionOutcome) -> Result<Watermark> {
        self.analytics
            .put_cursor(outcome.family, outcome.trade_date, outcome.cutoff)
            .await
            .with_context(|| format!("committing {} cursor", outcome.family))
    }

    pub async fn lookup(&self, family: DealFamily, keys: Vec<i64>) -> Result<Vec<DealHeader>> {
        fetch_family(self.ledger.as_ref(), family, &Selection::Keys(keys))
            .await
            .with_context(|| format!("looking up {family} deals"))
    }

    pub async fn cursor(&self, family: DealFamily, trade_date: NaiveDate) -> Result<Option<Watermark>> {
        self.analytics
            .get_cursor(family, trade_date)
            .await
            .with_context(|| format!("reading {family} cursor for {trade_date}"))
    }

    /// Runs every family enabled in `families.yaml`.
    pub async fn run_cycle(&self, trade_date: NaiveDate) -> Result<CycleSummary> {
        let registry = load_family_registry(&self.config.workspace_root).await?;
        self.run_families(trade_date, &registry.enabled()).await
    }

    /// Extracts the given families concurrently, commits cursors for the ones
    /// that succeeded and writes the run report. A failed family never
    /// advances its cursor and does not fail the cycle.
    pub async fn run_families(
        &self,
        trade_date: NaiveDate,
        families: &[DealFamily],
    ) -> Result<CycleSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("cycle", %run_id, %trade_date);

        async move {
            let mut tasks = JoinSet::new();
            for &family in families {
                let ledger = Arc::clone(&self.ledger);
                let analytics = Arc::clone(&self.analytics);
                tasks.spawn(async move {
                    let result = extract(ledger.as_ref(), analytics.as_ref(), family, trade_date).await;
                    (family, result)
                });
            }

            let mut results = BTreeMap::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((family, result)) => {
                        results.insert(family, result);
                    }
                    Err(err) => warn!(error = %err, "extraction task did not complete"),
                }
            }

            let mut reports = Vec::with_capacity(families.len());
            for &family in families {
                let report = match results.remove(&family) {
                    Some(Ok(outcome)) => self.commit_report(outcome).await,
                    Some(Err(err)) => failed_report(family, format!("{err:#}")),
                    None => failed_report(family, "extraction task did not complete".to_string()),
                };
                if let Some(error) = &report.error {
                    warn!(family = %family, error = %error, "family not committed");
                }
                reports.push(report);
            }

            let report = RunReport {
                run_id,
                trade_date,
                started_at,
                finished_at: Utc::now(),
                families: reports,
            };
            let run_dir = archive::write_run_report(&self.config.reports_dir, &report).await?;

            let failed = report.failed_families().len();
            info!(
                families = report.families.len(),
                failed,
                headers = report.families.iter().map(|f| f.header_count).sum::<usize>(),
                run_dir = %run_dir.display(),
                "extraction cycle finished"
            );
            Ok(CycleSummary { run_dir, report })
        }
        .instrument(span)
        .await
    }

    /// Merges findings onto the headers, upserts the rows and snapshots them
    /// under the run directory.
    pub async fn submit_findings(
        &self,
        run_id: Uuid,
        headers: &[DealHeader],
        findings: &Findings,
    ) -> Result<SubmitSummary> {
        let trades = merge::build_processed_trades(headers, findings)
            .context("building processed trades")?;
        let written = merge::upsert(self.analytics.as_ref(), &trades)
            .await
            .context("upserting processed trades")?;
        let manifest = archive::export_processed_trades(&self.config.reports_dir, run_id, &trades).await?;

        info!(%run_id, written, flagged = trades.iter().filter(|t| t.anomaly_detected).count(), "findings submitted");
        Ok(SubmitSummary {
            run_id,
            written,
            manifest,
        })
    }

    async fn commit_report(&self, outcome: ExtractionOutcome) -> FamilyReport {
        let mut report = FamilyReport {
            family: outcome.family,
            status: FamilyStatus::Committed,
            since: Some(outcome.since),
            cutoff: Some(outcome.cutoff),
            watermark_run_id: None,
            header_count: outcome.headers.len(),
            term_count: outcome.term_count(),
            error: None,
            headers: Vec::new(),
        };
        match self.commit(&outcome).await {
            Ok(watermark) => report.watermark_run_id = Some(watermark.run_id),
            Err(err) => {
                report.status = FamilyStatus::Failed;
                report.error = Some(format!("{err:#}"));
            }
        }
        report.headers = outcome.headers;
        report
    }
}

async fn extract<L, A>(
    ledger: &L,
    cursors: &A,
    family: DealFamily,
    trade_date: NaiveDate,
) -> Result<ExtractionOutcome>
where
    L: LedgerSource + 'static,
    A: CursorStore + ?Sized,
{
    let since = cursors
        .get_cursor(family, trade_date)
        .await
        .with_context(|| format!("reading {family} cursor for {trade_date}"))?
        .map(|watermark| watermark.cutoff)
        .unwrap_or_else(earliest_cutoff);
    let cutoff = Local::now().naive_local();

    let headers = fetch_family(ledger, family, &Selection::Window { trade_date, since })
        .await
        .with_context(|| format!("extracting {family} deals for {trade_date}"))?;

    Ok(ExtractionOutcome {
        family,
        trade_date,
        since,
        cutoff,
        headers,
    })
}

fn failed_report(family: DealFamily, error: String) -> FamilyReport {
    FamilyReport {
        family,
        status: FamilyStatus::Failed,
        since: None,
        cutoff: None,
        watermark_run_id: None,
        header_count: 0,
        term_count: 0,
        error: Some(error),
        headers: Vec::new(),
    }
}
