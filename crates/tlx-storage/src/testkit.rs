//! In-memory stand-ins for the ledger and analytics stores.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tlx_core::{DealFamily, ProcessedTrade, Watermark};
use tokio::sync::Mutex;

use crate::analytics::{CursorStore, TradeSink};
use crate::ledger::{LedgerQuery, LedgerRow, LedgerSource};
use crate::StoreError;

/// Replays JSON rows keyed by statement name and records every query issued.
///
/// Statements with no scripted rows return an empty result.
#[derive(Debug, Default)]
pub struct ScriptedLedger {
    rows: BTreeMap<&'static str, Vec<Value>>,
    failures: BTreeMap<&'static str, String>,
    issued: Mutex<Vec<LedgerQuery>>,
}

impl ScriptedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, statement: &'static str, rows: Vec<Value>) -> Self {
        self.rows.entry(statement).or_default().extend(rows);
        self
    }

    pub fn failing(mut self, statement: &'static str, message: impl Into<String>) -> Self {
        self.failures.insert(statement, message.into());
        self
    }

    pub async fn issued(&self) -> Vec<LedgerQuery> {
        self.issued.lock().await.clone()
    }

    pub async fn issued_names(&self) -> Vec<&'static str> {
        self.issued.lock().await.iter().map(|query| query.name).collect()
    }
}

#[async_trait]
impl LedgerSource for ScriptedLedger {
    async fn fetch_rows<R: LedgerRow>(&self, query: &LedgerQuery) -> Result<Vec<R>, StoreError> {
        self.issued.lock().await.push(query.clone());

        if let Some(message) = self.failures.get(query.name) {
            return Err(StoreError::Backend(message.clone()));
        }

        self.rows
            .get(query.name)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|row| {
                serde_json::from_value::<R>(row.clone()).map_err(|err| StoreError::Decode {
                    query: query.name.to_string(),
                    message: err.to_string(),
                })
            })
            .collect()
    }
}

/// Cursor store and trade sink backed by vectors.
#[derive(Debug, Default)]
pub struct MemoryAnalytics {
    watermarks: Mutex<Vec<Watermark>>,
    batches: Mutex<Vec<Vec<ProcessedTrade>>>,
    write_failure: Option<String>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_writes(message: impl Into<String>) -> Self {
        Self {
            write_failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub async fn watermarks(&self) -> Vec<Watermark> {
        self.watermarks.lock().await.clone()
    }

    pub async fn batches(&self) -> Vec<Vec<ProcessedTrade>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl CursorStore for MemoryAnalytics {
    async fn get_cursor(
        &self,
        family: DealFamily,
        trade_date: NaiveDate,
    ) -> Result<Option<Watermark>, StoreError> {
        let watermarks = self.watermarks.lock().await;
        Ok(watermarks
            .iter()
            .filter(|mark| mark.family == family && mark.trade_date == trade_date)
            .max_by_key(|mark| mark.run_id)
            .cloned())
    }

    async fn put_cursor(
        &self,
        family: DealFamily,
        trade_date: NaiveDate,
        cutoff: NaiveDateTime,
    ) -> Result<Watermark, StoreError> {
        if let Some(message) = &self.write_failure {
            return Err(StoreError::Backend(message.clone()));
        }
        let mut watermarks = self.watermarks.lock().await;
        let watermark = Watermark {
            run_id: watermarks.len() as i64 + 1,
            trade_date,
            family,
            cutoff,
            created_at: Utc::now(),
        };
        watermarks.push(watermark.clone());
        Ok(watermark)
    }
}

#[async_trait]
impl TradeSink for MemoryAnalytics {
    async fn upsert_processed_trades(&self, trades: &[ProcessedTrade]) -> Result<u64, StoreError> {
        if let Some(message) = &self.write_failure {
            return Err(StoreError::Backend(message.clone()));
        }
        self.batches.lock().await.push(trades.to_vec());
        Ok(trades.len() as u64)
    }
}
