//! ISO congestion rights: FTR options, FTR swaps and TCC swaps.
//!
//! All three sub-types share `iso_tccftrs`; the deal type column selects one.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction, PriceIndex, TccFtrKind};
use tlx_storage::{LedgerParams, LedgerSource, Statement};

use crate::common::CommonColumns;
use crate::{FetchError, HeaderFetcher, Selection};

pub const HEADERS: Statement = Statement::new(
    "tcc_ftr.headers",
    concat!(
        "SELECT DISTINCT
        d.deal_key::bigint AS deal_key,
        d.dlt_deal_type AS deal_type,",
        common_columns!(),
        "
        (SELECT MIN(m.gr_region) FROM ledger.iso_tccftr_months m
            WHERE m.deal_key = d.deal_key) AS region,
        d.tz_time_zone AS time_zone,
        d.dy_beg_day AS beg_date,
        d.dy_end_day AS end_date,
        d.sch_schedule AS holiday_schedule,
        d.volume::float8 AS volume,
        d.fixed_price::float8 AS fixed_price,
        d.ppep_pp_pool AS pool,
        d.ppep_pep_product AS product,
        d.pi_pb_publication AS publication,
        d.frq_frequency AS frequency,
        d.poi_pi_pub_index AS poi_index,
        d.pow_pi_pub_index AS pow_index
        FROM ledger.iso_tccftrs d",
        common_joins!("deal_key", "d.dlt_deal_type"),
        "WHERE d.trade_date = $1
          AND d.dlt_deal_type = $3
          AND (d.modify_date > $2 OR fbf.modify_date > $2)
        ORDER BY deal_key"
    ),
);

#[derive(Debug, Deserialize, FromRow)]
struct TccFtrRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    beg_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    holiday_schedule: Option<String>,
    volume: Option<f64>,
    fixed_price: Option<f64>,
    pool: Option<String>,
    product: Option<String>,
    publication: Option<String>,
    frequency: Option<String>,
    poi_index: Option<String>,
    pow_index: Option<String>,
}

impl TccFtrRow {
    fn into_header(self) -> DealHeader {
        let volume = self.volume.unwrap_or_default();
        let publication = self.publication.unwrap_or_default();
        let frequency = self.frequency.unwrap_or_default();

        let mut header = self.common.into_header();
        header.direction = Direction::from_signed_volume(volume);
        header.terms.push(DealTerm {
            vol_seq: 0,
            beg_date: self.beg_date.unwrap_or_default(),
            end_date: self.end_date.unwrap_or_default(),
            fixed_price: self.fixed_price.unwrap_or_default(),
            volume,
            pool1: self.pool.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            indexes1: vec![PriceIndex::new(
                publication.clone(),
                self.poi_index.unwrap_or_default(),
                frequency.clone(),
            )],
            indexes2: vec![PriceIndex::new(
                publication,
                self.pow_index.unwrap_or_default(),
                frequency,
            )],
            ..DealTerm::default()
        });
        header
    }
}

/// One fetcher per sub-type; the sub-type's deal type is bound as `$3`.
#[derive(Debug, Clone, Copy)]
pub struct TccFtrFetcher {
    kind: TccFtrKind,
}

impl TccFtrFetcher {
    pub fn new(kind: TccFtrKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for TccFtrFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::TccFtr(self.kind)
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let Selection::Window { trade_date, since } = selection else {
            return Err(FetchError::UnsupportedSelection {
                family: DealFamily::TccFtr(self.kind),
                selection: selection.kind(),
            });
        };
        let query = HEADERS.bind(LedgerParams::TypedWindow {
            deal_type: self.kind.deal_type().to_string(),
            trade_date: *trade_date,
            since: *since,
        });
        let rows: Vec<TccFtrRow> = ledger.fetch_rows(&query).await?;
        Ok(rows.into_iter().map(TccFtrRow::into_header).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{day, header_row, since, trade_date, window};
    use serde_json::json;
    use tlx_storage::testkit::ScriptedLedger;

    #[tokio::test]
    async fn sub_type_is_bound_with_the_window() {
        let ledger = ScriptedLedger::new().with_rows(
            "tcc_ftr.headers",
            vec![header_row(
                8,
                "FTRSWP",
                json!({
                    "beg_date": "2024-04-01",
                    "end_date": "2024-04-30",
                    "holiday_schedule": "NERC",
                    "volume": -12.0,
                    "fixed_price": 1.25,
                    "pool": "MISO",
                    "product": "ONPK",
                    "publication": "MISO DA",
                    "frequency": "HOURLY",
                    "poi_index": "ILLINOIS.HUB",
                    "pow_index": "INDIANA.HUB"
                }),
            )],
        );

        let headers = TccFtrFetcher::new(TccFtrKind::FtrSwap)
            .fetch(&ledger, &window())
            .await
            .expect("fetch");
        let header = &headers[0];
        assert_eq!(header.deal_type, "FTRSWP");
        assert_eq!(header.direction, Direction::Sale);
        assert!(!header.interaffiliate);
        assert_eq!(header.exotic_flag, "NA");

        let term = &header.terms[0];
        assert_eq!(term.beg_date, day(1));
        assert_eq!(term.indexes1, vec![PriceIndex::new("MISO DA", "ILLINOIS.HUB", "HOURLY")]);
        assert_eq!(term.indexes2, vec![PriceIndex::new("MISO DA", "INDIANA.HUB", "HOURLY")]);

        let issued = ledger.issued().await;
        assert_eq!(
            issued[0].params,
            LedgerParams::TypedWindow {
                deal_type: "FTRSWP".into(),
                trade_date: trade_date(),
                since: since(),
            }
        );
    }

    #[tokio::test]
    async fn keys_selection_is_unsupported() {
        let ledger = ScriptedLedger::new();
        let err = TccFtrFetcher::new(TccFtrKind::TccSwap)
            .fetch(&ledger, &Selection::Keys(vec![1]))
            .await
            .expect_err("window only");
        assert!(matches!(err, FetchError::UnsupportedSelection { .. }));
    }
}
