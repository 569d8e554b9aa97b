//! Read-only access to the trade ledger.
//!
//! Family adapters describe their queries as named [`Statement`]s and decode rows
//! into their own structs; the [`LedgerSource`] seam lets tests replay scripted
//! rows instead of talking to Postgres.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::FromRow;
use tracing::debug;

use crate::StoreError;

/// Positional parameters of a ledger query.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerParams {
    /// `$1` trade date, `$2` changed-since timestamp.
    Window {
        trade_date: NaiveDate,
        since: NaiveDateTime,
    },
    /// As `Window`, plus `$3` deal type for tables shared by several types.
    TypedWindow {
        deal_type: String,
        trade_date: NaiveDate,
        since: NaiveDateTime,
    },
    /// `$1` deal keys as `bigint[]`.
    Keys(Vec<i64>),
    /// `$1` deal keys and `$2` volume sequences as parallel arrays.
    KeyedSequences(Vec<(i64, i32)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    pub name: &'static str,
    pub sql: &'static str,
}

impl Statement {
    pub const fn new(name: &'static str, sql: &'static str) -> Self {
        Self { name, sql }
    }

    pub fn bind(&self, params: LedgerParams) -> LedgerQuery {
        LedgerQuery {
            name: self.name,
            sql: self.sql,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerQuery {
    pub name: &'static str,
    pub sql: &'static str,
    pub params: LedgerParams,
}

/// A row type decodable both from Postgres and from JSON fixtures.
pub trait LedgerRow: DeserializeOwned + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static {}

impl<T> LedgerRow for T where T: DeserializeOwned + for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static
{}

#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn fetch_rows<R: LedgerRow>(&self, query: &LedgerQuery) -> Result<Vec<R>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerSource for PgLedger {
    async fn fetch_rows<R: LedgerRow>(&self, query: &LedgerQuery) -> Result<Vec<R>, StoreError> {
        let statement = sqlx::query_as::<_, R>(query.sql);
        let statement = match &query.params {
            LedgerParams::Window { trade_date, since } => statement.bind(*trade_date).bind(*since),
            LedgerParams::TypedWindow {
                deal_type,
                trade_date,
                since,
            } => statement
                .bind(*trade_date)
                .bind(*since)
                .bind(deal_type.clone()),
            LedgerParams::Keys(keys) => statement.bind(keys.clone()),
            LedgerParams::KeyedSequences(pairs) => {
                let (keys, sequences): (Vec<i64>, Vec<i32>) = pairs.iter().copied().unzip();
                statement.bind(keys).bind(sequences)
            }
        };

        let rows = statement.fetch_all(&self.pool).await?;
        debug!(query = query.name, rows = rows.len(), "ledger rows fetched");
        Ok(rows)
    }
}
