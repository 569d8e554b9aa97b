//! Run reports and Parquet snapshots under `<reports_dir>/<run_id>/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, BooleanArray, Date32Array, Int64Array, RecordBatch, StringArray};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tlx_core::{DealFamily, DealHeader, ProcessedTrade};
use tokio::fs;
use uuid::Uuid;

pub const EXTRACTION_REPORT: &str = "extraction.json";
pub const SUMMARY_REPORT: &str = "summary.md";
pub const PROCESSED_TRADES_SNAPSHOT: &str = "processed_trades.parquet";
pub const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyStatus {
    Committed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyReport {
    pub family: DealFamily,
    pub status: FamilyStatus,
    pub since: Option<NaiveDateTime>,
    pub cutoff: Option<NaiveDateTime>,
    pub watermark_run_id: Option<i64>,
    pub header_count: usize,
    pub term_count: usize,
    pub error: Option<String>,
    #[serde(default)]
    pub headers: Vec<DealHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub trade_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub families: Vec<FamilyReport>,
}

impl RunReport {
    pub fn failed_families(&self) -> Vec<DealFamily> {
        self.families
            .iter()
            .filter(|report| report.status == FamilyStatus::Failed)
            .map(|report| report.family)
            .collect()
    }

    /// Headers of every family that extracted cleanly, in report order.
    pub fn committed_headers(&self) -> Vec<DealHeader> {
        self.families
            .iter()
            .filter(|report| report.status == FamilyStatus::Committed)
            .flat_map(|report| report.headers.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub fn run_dir(reports_dir: &Path, run_id: Uuid) -> PathBuf {
    reports_dir.join(run_id.to_string())
}

/// Writes `extraction.json` and `summary.md`, returning the run directory.
pub async fn write_run_report(reports_dir: &Path, report: &RunReport) -> Result<PathBuf> {
    let dir = run_dir(reports_dir, report.run_id);
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(report).context("serializing extraction report")?;
    fs::write(dir.join(EXTRACTION_REPORT), json)
        .await
        .with_context(|| format!("writing {EXTRACTION_REPORT}"))?;

    fs::write(dir.join(SUMMARY_REPORT), summary_markdown(report))
        .await
        .with_context(|| format!("writing {SUMMARY_REPORT}"))?;

    Ok(dir)
}

pub async fn read_run_report(path: &Path) -> Result<RunReport> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

pub fn summary_markdown(report: &RunReport) -> String {
    let committed = report
        .families
        .iter()
        .filter(|family| family.status == FamilyStatus::Committed)
        .count();

    let rows = report
        .families
        .iter()
        .map(|family| {
            let status = match family.status {
                FamilyStatus::Committed => "committed",
                FamilyStatus::Failed => "failed",
            };
            let cutoff = family
                .cutoff
                .map(|cutoff| cutoff.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "| {} | {} | {} | {} | {} |",
                family.family.tag(),
                status,
                family.header_count,
                family.term_count,
                cutoff
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let failures = report
        .families
        .iter()
        .filter_map(|family| {
            family
                .error
                .as_ref()
                .map(|error| format!("- {}: {}", family.family.tag(), error))
        })
        .collect::<Vec<_>>();
    let failures = if failures.is_empty() {
        "- none".to_string()
    } else {
        failures.join("\n")
    };

    format!(
        "# TLX Extraction Summary\n\n- Run ID: `{}`\n- Trade date: {}\n- Started: {}\n- Finished: {}\n- Families committed: {}/{}\n- Headers: {}\n\n## Families\n| family | status | headers | terms | cutoff |\n|---|---|---|---|---|\n{}\n\n## Failures\n{}\n",
        report.run_id,
        report.trade_date,
        report.started_at,
        report.finished_at,
        committed,
        report.families.len(),
        report.families.iter().map(|family| family.header_count).sum::<usize>(),
        rows,
        failures,
    )
}

/// Writes `processed_trades.parquet` and a SHA-256 manifest into the run directory.
pub async fn export_processed_trades(
    reports_dir: &Path,
    run_id: Uuid,
    trades: &[ProcessedTrade],
) -> Result<PathBuf> {
    let dir = run_dir(reports_dir, run_id);
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let snapshot = encode_processed_trades(trades)?;
    let snapshot_path = dir.join(PROCESSED_TRADES_SNAPSHOT);
    fs::write(&snapshot_path, &snapshot)
        .await
        .with_context(|| format!("writing {}", snapshot_path.display()))?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        run_id,
        files: vec![SnapshotManifestFile {
            name: "processed_trades".to_string(),
            path: PROCESSED_TRADES_SNAPSHOT.to_string(),
            sha256: hex::encode(Sha256::digest(&snapshot)),
            bytes: snapshot.len() as u64,
        }],
    };
    let manifest_path = dir.join(MANIFEST);
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    Ok(manifest_path)
}

/// Days between 0001-01-01 and the Unix epoch, for `Date32` columns.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Encodes the rows as one Parquet record batch in memory so the manifest
/// hashes exactly the bytes written.
fn encode_processed_trades(trades: &[ProcessedTrade]) -> Result<Vec<u8>> {
    let trade_ids: Int64Array = trades.iter().map(|t| Some(t.trade_id)).collect();
    let deal_types: StringArray = trades.iter().map(|t| Some(t.deal_type.as_str())).collect();
    let portfolio_ids: Int64Array = trades.iter().map(|t| Some(t.portfolio_id)).collect();
    let transaction_dates: Date32Array = trades
        .iter()
        .map(|t| Some(t.transaction_date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE))
        .collect();
    let details: StringArray = trades.iter().map(|t| Some(t.trade_detail.as_str())).collect();
    let detected: BooleanArray = trades.iter().map(|t| Some(t.anomaly_detected)).collect();
    let results: StringArray = trades.iter().map(|t| t.anomaly_test_result.as_deref()).collect();
    let parameters: StringArray = trades.iter().map(|t| t.model_parameters.as_deref()).collect();

    let columns: Vec<(&str, ArrayRef, bool)> = vec![
        ("trade_id", Arc::new(trade_ids), false),
        ("deal_type", Arc::new(deal_types), false),
        ("portfolio_id", Arc::new(portfolio_ids), false),
        ("transaction_date", Arc::new(transaction_dates), false),
        ("trade_detail", Arc::new(details), false),
        ("anomaly_detected", Arc::new(detected), false),
        ("anomaly_test_result", Arc::new(results), true),
        ("model_parameters", Arc::new(parameters), true),
    ];
    let batch = RecordBatch::try_from_iter_with_nullable(columns)
        .context("building processed_trades record batch")?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), None)
        .context("opening processed_trades parquet writer")?;
    writer
        .write(&batch)
        .context("encoding processed_trades record batch")?;
    writer
        .close()
        .context("finishing processed_trades parquet")?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Array;
    use arrow_schema::DataType;
    use chrono::TimeZone;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::io::Write;

    fn report() -> RunReport {
        let at = Utc
            .with_ymd_and_hms(2024, 4, 2, 6, 0, 0)
            .single()
            .expect("timestamp");
        let cutoff = NaiveDate::from_ymd_opt(2024, 4, 2)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .expect("cutoff");
        RunReport {
            run_id: Uuid::nil(),
            trade_date: NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"),
            started_at: at,
            finished_at: at,
            families: vec![
                FamilyReport {
                    family: DealFamily::Power,
                    status: FamilyStatus::Committed,
                    since: None,
                    cutoff: Some(cutoff),
                    watermark_run_id: Some(4),
                    header_count: 2,
                    term_count: 5,
                    error: None,
                    headers: vec![DealHeader::default(), DealHeader::default()],
                },
                FamilyReport {
                    family: DealFamily::Transmission,
                    status: FamilyStatus::Failed,
                    since: None,
                    cutoff: None,
                    watermark_run_id: None,
                    header_count: 0,
                    term_count: 0,
                    error: Some("store backend error: timeout".into()),
                    headers: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn summary_lists_families_and_failures() {
        let markdown = summary_markdown(&report());
        assert!(markdown.contains("- Families committed: 1/2"));
        assert!(markdown.contains("| PWR | committed | 2 | 5 | 2024-04-02 06:00:00 |"));
        assert!(markdown.contains("| TRANS | failed | 0 | 0 | - |"));
        assert!(markdown.contains("- TRANS: store backend error: timeout"));
    }

    #[tokio::test]
    async fn run_report_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_dir = write_run_report(dir.path(), &report()).await.expect("write");
        assert!(run_dir.join(SUMMARY_REPORT).exists());

        let back = read_run_report(&run_dir.join(EXTRACTION_REPORT)).await.expect("read");
        assert_eq!(back.failed_families(), vec![DealFamily::Transmission]);
        assert_eq!(back.committed_headers().len(), 2);
    }

    #[tokio::test]
    async fn manifest_hashes_the_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trades = vec![ProcessedTrade {
            trade_id: 10,
            deal_type: "PWR".into(),
            portfolio_id: 3,
            transaction_date: NaiveDate::from_ymd_opt(2024, 4, 1).expect("date"),
            trade_detail: "{}".into(),
            anomaly_detected: false,
            anomaly_test_result: None,
            model_parameters: None,
        }];

        let manifest_path = export_processed_trades(dir.path(), Uuid::nil(), &trades)
            .await
            .expect("export");
        let manifest: SnapshotManifest =
            serde_json::from_slice(&std::fs::read(&manifest_path).expect("manifest")).expect("json");
        let file = &manifest.files[0];
        assert_eq!(file.path, PROCESSED_TRADES_SNAPSHOT);

        let bytes = std::fs::read(run_dir(dir.path(), Uuid::nil()).join(PROCESSED_TRADES_SNAPSHOT))
            .expect("snapshot");
        assert_eq!(file.bytes, bytes.len() as u64);
        assert_eq!(file.sha256, hex::encode(Sha256::digest(&bytes)));
        assert_eq!(&bytes[..4], b"PAR1");
    }

    #[test]
    fn snapshot_columns_are_typed() {
        let trades = vec![ProcessedTrade {
            trade_id: 42,
            deal_type: "MISC".into(),
            portfolio_id: 8,
            transaction_date: NaiveDate::from_ymd_opt(1970, 1, 11).expect("date"),
            trade_detail: "{}".into(),
            anomaly_detected: true,
            anomaly_test_result: Some("charge_outlier high".into()),
            model_parameters: None,
        }];
        let encoded = encode_processed_trades(&trades).expect("encode");
        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(&encoded).expect("write");

        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .expect("reader")
            .build()
            .expect("build");
        let batches: Vec<RecordBatch> = reader.collect::<Result<_, _>>().expect("batches");
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 1);

        let schema = batch.schema();
        assert_eq!(
            schema.field_with_name("transaction_date").expect("field").data_type(),
            &DataType::Date32
        );
        assert!(!schema.field_with_name("trade_id").expect("field").is_nullable());
        assert!(schema.field_with_name("model_parameters").expect("field").is_nullable());

        let dates = batch
            .column_by_name("transaction_date")
            .and_then(|column| column.as_any().downcast_ref::<Date32Array>())
            .expect("date column");
        assert_eq!(dates.value(0), 10);
        let detected = batch
            .column_by_name("anomaly_detected")
            .and_then(|column| column.as_any().downcast_ref::<BooleanArray>())
            .expect("flag column");
        assert!(detected.value(0));
    }
}
