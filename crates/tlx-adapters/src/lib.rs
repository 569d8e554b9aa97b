//! Family header fetchers: rebuild ledger deals from header, term and index rows.

#[macro_use]
mod sql;

pub mod capacity;
pub mod common;
pub mod correlate;
pub mod emission;
pub mod heat_rate;
pub mod misc_charge;
pub mod power;
pub mod power_option;
pub mod power_swap;
pub mod ptp;
pub mod spread_option;
pub mod tcc_ftr;
pub mod transmission;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tlx_core::{DealFamily, DealHeader, TimestampError};
use tlx_storage::{LedgerParams, LedgerQuery, LedgerSource, Statement, StoreError};
use tracing::{info, info_span, Instrument};

pub use correlate::{fetch_indexes, fetch_terms, CorrelationKeys, IndexKeys, IndexRow};

pub const CRATE_NAME: &str = "tlx-adapters";

/// Which headers a fetch should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Deals traded on `trade_date` and changed after `since`.
    Window {
        trade_date: NaiveDate,
        since: NaiveDateTime,
    },
    /// Explicit deal keys, in the order given.
    Keys(Vec<i64>),
}

impl Selection {
    pub fn kind(&self) -> &'static str {
        match self {
            Selection::Window { .. } => "window",
            Selection::Keys(_) => "keys",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("deal {deal_key}: {source}")]
    Timestamp {
        deal_key: i64,
        #[source]
        source: TimestampError,
    },
    #[error("{family} deals cannot be selected by {selection}")]
    UnsupportedSelection {
        family: DealFamily,
        selection: &'static str,
    },
    #[error("deal {deal_key}: term position {position} exceeds the volume sequence range")]
    SequenceOverflow { deal_key: i64, position: usize },
    #[error("{family} deals have no {lookup} lookup")]
    NoCorrelation {
        family: DealFamily,
        lookup: &'static str,
    },
}

#[async_trait]
pub trait HeaderFetcher<S: LedgerSource>: Send + Sync {
    fn family(&self) -> DealFamily;

    /// Headers in primary-query row order, terms attached. Any store or
    /// decode failure aborts the whole fetch.
    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError>;
}

pub fn fetcher_for<S: LedgerSource + 'static>(family: DealFamily) -> Box<dyn HeaderFetcher<S>> {
    match family {
        DealFamily::Power => Box::new(power::PowerFetcher),
        DealFamily::PowerSwap => Box::new(power_swap::PowerSwapFetcher),
        DealFamily::PowerOption => Box::new(power_option::PowerOptionFetcher),
        DealFamily::Capacity => Box::new(capacity::CapacityFetcher),
        DealFamily::PointToPoint => Box::new(ptp::PointToPointFetcher),
        DealFamily::Emission => Box::new(emission::EmissionFetcher),
        DealFamily::EmissionOption => Box::new(emission::EmissionOptionFetcher),
        DealFamily::SpreadOption => Box::new(spread_option::SpreadOptionFetcher),
        DealFamily::HeatRateSwap => Box::new(heat_rate::HeatRateSwapFetcher),
        DealFamily::TccFtr(kind) => Box::new(tcc_ftr::TccFtrFetcher::new(kind)),
        DealFamily::Transmission => Box::new(transmission::TransmissionFetcher),
        DealFamily::MiscCharge => Box::new(misc_charge::MiscChargeFetcher),
    }
}

pub async fn fetch_family<S: LedgerSource + 'static>(
    ledger: &S,
    family: DealFamily,
    selection: &Selection,
) -> Result<Vec<DealHeader>, FetchError> {
    let span = info_span!("fetch", family = %family, selection = selection.kind());
    async move {
        let headers = fetcher_for::<S>(family).fetch(ledger, selection).await?;
        let terms: usize = headers.iter().map(|header| header.terms.len()).sum();
        info!(headers = headers.len(), terms, "family fetched");
        Ok(headers)
    }
    .instrument(span)
    .await
}

/// Binds the primary header statement for a selection.
///
/// Families without a by-keys statement reject `Selection::Keys`.
pub(crate) fn primary_query(
    family: DealFamily,
    selection: &Selection,
    window: Statement,
    by_keys: Option<Statement>,
) -> Result<LedgerQuery, FetchError> {
    match (selection, by_keys) {
        (Selection::Window { trade_date, since }, _) => Ok(window.bind(LedgerParams::Window {
            trade_date: *trade_date,
            since: *since,
        })),
        (Selection::Keys(keys), Some(statement)) => {
            Ok(statement.bind(LedgerParams::Keys(keys.clone())))
        }
        (Selection::Keys(_), None) => Err(FetchError::UnsupportedSelection {
            family,
            selection: selection.kind(),
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tlx_storage::testkit::ScriptedLedger;

    #[tokio::test]
    async fn keys_selection_is_rejected_for_window_only_families() {
        let ledger = ScriptedLedger::new();
        let err = fetch_family(&ledger, DealFamily::Capacity, &Selection::Keys(vec![1]))
            .await
            .expect_err("capacity has no by-keys statement");
        assert!(matches!(
            err,
            FetchError::UnsupportedSelection {
                family: DealFamily::Capacity,
                selection: "keys"
            }
        ));
        assert!(ledger.issued().await.is_empty());
    }

    #[test]
    fn every_family_has_a_fetcher() {
        for family in DealFamily::ALL {
            assert_eq!(fetcher_for::<ScriptedLedger>(family).family(), family);
        }
    }

    #[tokio::test]
    async fn empty_window_yields_no_headers() {
        let ledger = ScriptedLedger::new();
        for family in DealFamily::ALL {
            let headers = fetch_family(&ledger, family, &fixtures::window())
                .await
                .expect("empty fetch");
            assert!(headers.is_empty(), "{family} returned headers");
        }
        assert_eq!(ledger.issued().await.len(), DealFamily::ALL.len());
    }
}
