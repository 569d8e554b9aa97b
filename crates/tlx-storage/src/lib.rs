//! Postgres access for TLX: the read-only trade ledger and the analytics store.

pub mod analytics;
pub mod ledger;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::debug;

pub use analytics::{CursorStore, PgAnalytics, TradeSink};
pub use ledger::{LedgerParams, LedgerQuery, LedgerRow, LedgerSource, PgLedger, Statement};

pub const CRATE_NAME: &str = "tlx-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("decoding rows of `{query}`: {message}")]
    Decode { query: String, message: String },
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Opens a pool; callers share it across families.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    debug!(max_connections, "opening postgres pool");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_names_the_query() {
        let err = StoreError::Decode {
            query: "power.headers".into(),
            message: "missing field `deal_key`".into(),
        };
        assert_eq!(
            err.to_string(),
            "decoding rows of `power.headers`: missing field `deal_key`"
        );
    }
}
