//! Joins scorer findings onto extracted headers and upserts the result.

use std::collections::BTreeMap;

use thiserror::Error;
use tlx_core::{DealHeader, Finding, Findings, ProcessedTrade};
use tlx_storage::{StoreError, TradeSink};
use tracing::debug;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("serializing processed trade: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Findings for `header` that count as anomalies, in scorer order.
///
/// A finding naming a deal type only applies to headers of that type.
fn flagged_for<'a>(header: &DealHeader, findings: &'a Findings) -> Vec<&'a Finding> {
    findings
        .get(&header.deal_key)
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter(|finding| finding.is_flagged())
        .filter(|finding| {
            finding
                .deal_type
                .as_deref()
                .map_or(true, |deal_type| deal_type == header.deal_type)
        })
        .collect()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Drops all but the last row per `(trade_id, deal_type)`. The upsert
/// target cannot take the same conflict key twice in one statement.
fn last_per_key(trades: Vec<ProcessedTrade>) -> Vec<ProcessedTrade> {
    let mut last = BTreeMap::new();
    for (index, trade) in trades.iter().enumerate() {
        last.insert((trade.trade_id, trade.deal_type.clone()), index);
    }
    let before = trades.len();
    let kept: Vec<ProcessedTrade> = trades
        .into_iter()
        .enumerate()
        .filter(|(index, trade)| {
            last.get(&(trade.trade_id, trade.deal_type.clone())) == Some(index)
        })
        .map(|(_, trade)| trade)
        .collect();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "duplicate processed trades collapsed");
    }
    kept
}

pub fn build_processed_trades(
    headers: &[DealHeader],
    findings: &Findings,
) -> Result<Vec<ProcessedTrade>, SubmitError> {
    let trades = headers
        .iter()
        .map(|header| {
            let flagged = flagged_for(header, findings);
            let message = flagged
                .iter()
                .map(|finding| format!("{} {}", finding.model_name, finding.message))
                .collect::<Vec<_>>()
                .join(";");
            let parameters = flagged
                .iter()
                .map(|finding| serde_json::to_string(finding))
                .collect::<Result<Vec<_>, _>>()?
                .join(";");

            Ok(ProcessedTrade {
                trade_id: header.deal_key,
                deal_type: header.deal_type.clone(),
                portfolio_id: header.portfolio_id,
                transaction_date: header.transaction_date,
                trade_detail: serde_json::to_string(header)?,
                anomaly_detected: !message.is_empty(),
                anomaly_test_result: non_empty(message),
                model_parameters: non_empty(parameters),
            })
        })
        .collect::<Result<Vec<_>, SubmitError>>()?;
    Ok(last_per_key(trades))
}

/// Builds every row first, then writes them in one call. Returns the number
/// of rows written.
pub async fn submit<S: TradeSink + ?Sized>(
    sink: &S,
    headers: &[DealHeader],
    findings: &Findings,
) -> Result<usize, SubmitError> {
    let trades = build_processed_trades(headers, findings)?;
    upsert(sink, &trades).await
}

/// One set-valued write; an empty batch never reaches the sink.
pub async fn upsert<S: TradeSink + ?Sized>(
    sink: &S,
    trades: &[ProcessedTrade],
) -> Result<usize, SubmitError> {
    if trades.is_empty() {
        debug!("no processed trades to submit");
        return Ok(0);
    }
    sink.upsert_processed_trades(trades).await?;
    debug!(rows = trades.len(), "processed trades upserted");
    Ok(trades.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tlx_storage::testkit::MemoryAnalytics;

    fn header(deal_key: i64, deal_type: &str) -> DealHeader {
        DealHeader {
            deal_key,
            deal_type: deal_type.to_string(),
            portfolio_id: 77,
            ..DealHeader::default()
        }
    }

    fn finding(model: &str, message: &str, label: &str) -> Finding {
        Finding {
            model_name: model.to_string(),
            message: message.to_string(),
            scored_label: label.to_string(),
            deal_key: None,
            deal_type: None,
            payload: BTreeMap::new(),
        }
    }

    #[test]
    fn only_negative_findings_contribute() {
        let mut findings = Findings::new();
        findings.insert(
            5,
            vec![
                finding("price_model", "price outside band", "NO"),
                finding("volume_model", "volume ok", "YES"),
            ],
        );

        let trades = build_processed_trades(&[header(5, "PWR")], &findings).expect("build");
        let trade = &trades[0];
        assert!(trade.anomaly_detected);
        assert_eq!(
            trade.anomaly_test_result.as_deref(),
            Some("price_model price outside band")
        );
        let parameters = trade.model_parameters.as_deref().expect("parameters");
        assert!(parameters.contains("\"model_name\":\"price_model\""));
        assert!(!parameters.contains(';'));
        assert!(!parameters.contains("volume_model"));
    }

    #[test]
    fn multiple_findings_join_with_semicolons() {
        let mut extra = finding("b", "second", "NO");
        extra.payload.insert("threshold".into(), json!(0.9));
        let mut findings = Findings::new();
        findings.insert(9, vec![finding("a", "first", "NO"), extra]);

        let trades = build_processed_trades(&[header(9, "PSWAP")], &findings).expect("build");
        assert_eq!(trades[0].anomaly_test_result.as_deref(), Some("a first;b second"));
        let parameters = trades[0].model_parameters.as_deref().expect("parameters");
        let parts: Vec<&str> = parameters.split(';').collect();
        assert_eq!(parts.len(), 2);
        let second: serde_json::Value = serde_json::from_str(parts[1]).expect("finding json");
        assert_eq!(second["threshold"], json!(0.9));
    }

    #[test]
    fn clean_headers_have_no_anomaly_text() {
        let trades = build_processed_trades(&[header(1, "PWR")], &Findings::new()).expect("build");
        let trade = &trades[0];
        assert!(!trade.anomaly_detected);
        assert_eq!(trade.anomaly_test_result, None);
        assert_eq!(trade.model_parameters, None);
        assert_eq!(trade.portfolio_id, 77);

        let detail: DealHeader = serde_json::from_str(&trade.trade_detail).expect("detail");
        assert_eq!(detail, header(1, "PWR"));
    }

    #[test]
    fn typed_findings_skip_other_families() {
        let mut typed = finding("m", "wrong family", "NO");
        typed.deal_type = Some("TRANS".into());
        let mut findings = Findings::new();
        findings.insert(3, vec![typed]);

        let trades = build_processed_trades(&[header(3, "PWR")], &findings).expect("build");
        assert!(!trades[0].anomaly_detected);
    }

    #[test]
    fn repeated_headers_collapse_to_the_last_row() {
        let mut first = header(9, "PWR");
        first.trader = "early".into();
        let mut last = header(9, "PWR");
        last.trader = "late".into();
        let headers = vec![first, header(4, "PWR"), last, header(9, "PSWAP")];

        let trades = build_processed_trades(&headers, &Findings::new()).expect("build");
        let keys: Vec<(i64, &str)> = trades
            .iter()
            .map(|trade| (trade.trade_id, trade.deal_type.as_str()))
            .collect();
        assert_eq!(keys, vec![(4, "PWR"), (9, "PWR"), (9, "PSWAP")]);
        let detail: DealHeader = serde_json::from_str(&trades[1].trade_detail).expect("detail");
        assert_eq!(detail.trader, "late");
    }

    #[tokio::test]
    async fn duplicate_headers_reach_the_sink_once() {
        let sink = MemoryAnalytics::new();
        let headers = vec![header(9, "PWR"), header(9, "PWR")];
        let written = submit(&sink, &headers, &Findings::new()).await.expect("submit");
        assert_eq!(written, 1);
        assert_eq!(sink.batches().await[0].len(), 1);
    }

    #[tokio::test]
    async fn empty_submit_writes_nothing() {
        let sink = MemoryAnalytics::new();
        let written = submit(&sink, &[], &Findings::new()).await.expect("submit");
        assert_eq!(written, 0);
        assert!(sink.batches().await.is_empty());
    }

    #[tokio::test]
    async fn submit_is_one_set_valued_write() {
        let sink = MemoryAnalytics::new();
        let headers = vec![header(1, "PWR"), header(2, "PWR"), header(3, "MISC")];
        let written = submit(&sink, &headers, &Findings::new()).await.expect("submit");
        assert_eq!(written, 3);
        let batches = sink.batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn store_failures_pass_through() {
        let sink = MemoryAnalytics::failing_writes("connection reset");
        let err = submit(&sink, &[header(1, "PWR")], &Findings::new())
            .await
            .expect_err("store failure");
        assert!(matches!(err, SubmitError::Store(StoreError::Backend(ref message)) if message == "connection reset"));
    }
}
