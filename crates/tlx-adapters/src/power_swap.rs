//! Financial power swaps (`PSWAP`).
//!
//! Standard swaps carry their single term on the header row. Non-standard
//! swaps take their periods from `power_swap_volumes`, backfilled with the
//! header row's pool, product, indexes and holiday schedule.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction, PriceIndex};
use tlx_storage::{LedgerSource, Statement};

use crate::common::{interaffiliate, CommonColumns, ExecutionColumns};
use crate::correlate::{
    classify, fetch_keyed_rows, group_by_key, splice, CorrelationKeys, RowTerm,
};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

macro_rules! power_swap_header_select {
    () => {
        concat!(
            "SELECT DISTINCT
            d.pswap_key::bigint AS deal_key,
            d.dlt_deal_type AS deal_type,",
            common_columns!(),
            "
            (SELECT SUM(ABS(m.volume))::float8 FROM ledger.power_swap_months m
                WHERE m.pswap_key = d.pswap_key) AS total_quantity,
            (SELECT MIN(m.gr_region) FROM ledger.power_swap_months m
                WHERE m.pswap_key = d.pswap_key) AS region,
            d.tz_time_zone AS time_zone,
            d.ib_prt_portfolio::bigint AS ib_portfolio_id,
            ip.description AS ib_portfolio,
            d.ib_ur_trader AS ib_trader,
            d.option_key::bigint AS option_key,
            d.ppep_pp_pool AS pool,
            d.ppep_pep_product AS product,
            d.volume::float8 AS volume,
            d.fixed_price::float8 AS fixed_price,
            d.nonstd_flag,
            d.pi_pb_publication AS publication,
            d.pi_pub_index AS pub_index,
            d.frq_frequency AS frequency,
            d.fix_pi_pb_publication AS fix_publication,
            d.fix_pi_pub_index AS fix_pub_index,
            d.fix_frq_frequency AS fix_frequency,
            d.dy_beg_day AS start_date,
            d.dy_end_day AS end_date,
            d.sch_schedule AS holiday_schedule,",
            execution_columns!(),
            "FROM ledger.power_swaps d
            LEFT JOIN ledger.portfolios ip ON ip.portfolio = d.ib_prt_portfolio",
            common_joins!("pswap_key", "d.dlt_deal_type"),
            execution_attributes!("pswap_key", "d.dlt_deal_type"),
        )
    };
}

pub const HEADERS: Statement = Statement::new(
    "power_swap.headers",
    concat!(
        power_swap_header_select!(),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2
               OR fbf.modify_date > $2
               OR EXISTS (SELECT 1 FROM ledger.power_swap_volumes v
                          WHERE v.pswp_pswap_key = d.pswap_key AND v.modify_date > $2))
        ORDER BY deal_key"
    ),
);

pub const HEADERS_BY_KEYS: Statement = Statement::new(
    "power_swap.headers_by_keys",
    concat!(
        power_swap_header_select!(),
        "WHERE d.pswap_key = ANY($1)
        ORDER BY deal_key"
    ),
);

pub const TERMS: Statement = Statement::new(
    "power_swap.terms",
    "SELECT
        pswp_pswap_key::bigint AS deal_key,
        volume_seq::int AS vol_seq,
        dy_beg_day AS beg_date,
        dy_end_day AS end_date
    FROM ledger.power_swap_volumes
    WHERE pswp_pswap_key = ANY($1)
    ORDER BY pswp_pswap_key, volume_seq",
);

#[derive(Debug, Deserialize, FromRow)]
struct PowerSwapRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    total_quantity: Option<f64>,
    ib_portfolio_id: Option<i64>,
    ib_portfolio: Option<String>,
    ib_trader: Option<String>,
    option_key: Option<i64>,
    pool: Option<String>,
    product: Option<String>,
    volume: Option<f64>,
    fixed_price: Option<f64>,
    nonstd_flag: Option<String>,
    publication: Option<String>,
    pub_index: Option<String>,
    frequency: Option<String>,
    fix_publication: Option<String>,
    fix_pub_index: Option<String>,
    fix_frequency: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    holiday_schedule: Option<String>,
}

impl PowerSwapRow {
    fn into_parts(self) -> Result<(DealHeader, RowTerm), FetchError> {
        let deal_key = self.common.deal_key;
        let execution_time = self.execution.timestamp(deal_key)?;
        let volume = self.volume.unwrap_or_default();

        let mut header = self.common.into_header();
        header.direction = Direction::from_signed_volume(volume);
        header.interaffiliate = interaffiliate(&header);
        header.total_quantity = self.total_quantity.unwrap_or_default();
        header.ib_portfolio_id = self.ib_portfolio_id.unwrap_or_default();
        header.ib_portfolio = self.ib_portfolio.unwrap_or_default();
        header.ib_trader = self.ib_trader.unwrap_or_default();
        header.exercised_option_key = self.option_key.unwrap_or_default();
        header.start_date = self.start_date.unwrap_or_default();
        header.end_date = self.end_date.unwrap_or_default();
        header.execution_time = execution_time;
        header.exotic_flag = self.execution.exotic_flag_or_default();

        let mut indexes2 = Vec::new();
        if let (Some(publication), Some(index), Some(frequency)) =
            (self.fix_publication, self.fix_pub_index, self.fix_frequency)
        {
            indexes2.push(PriceIndex::new(publication, index, frequency));
        }

        let term = DealTerm {
            beg_date: header.start_date,
            end_date: header.end_date,
            fixed_price: self.fixed_price.unwrap_or_default(),
            volume,
            pool1: self.pool.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            indexes1: vec![PriceIndex::new(
                self.publication.unwrap_or_default(),
                self.pub_index.unwrap_or_default(),
                self.frequency.unwrap_or_default(),
            )],
            indexes2,
            ..DealTerm::default()
        };

        Ok((header, RowTerm::from_flag(self.nonstd_flag.as_deref(), term)))
    }
}

#[derive(Debug, Deserialize, FromRow)]
struct PowerSwapVolumeRow {
    deal_key: i64,
    vol_seq: i32,
    beg_date: NaiveDate,
    end_date: NaiveDate,
}

fn backfill(initial: &DealTerm, term: &mut DealTerm) {
    term.pool1 = initial.pool1.clone();
    term.product1 = initial.product1.clone();
    term.indexes1 = initial.indexes1.clone();
    term.indexes2 = initial.indexes2.clone();
    term.holiday_schedule = initial.holiday_schedule.clone();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PowerSwapFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for PowerSwapFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::PowerSwap
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query =
            primary_query(DealFamily::PowerSwap, selection, HEADERS, Some(HEADERS_BY_KEYS))?;
        let rows: Vec<PowerSwapRow> = ledger.fetch_rows(&query).await?;
        let parts = rows
            .into_iter()
            .map(PowerSwapRow::into_parts)
            .collect::<Result<Vec<_>, _>>()?;

        let classified = classify(parts);
        let fetched = fetch_terms(ledger, &classified.needs_lookup).await?;
        Ok(splice(classified, &fetched, backfill))
    }
}

pub(crate) async fn fetch_terms<S: LedgerSource>(
    ledger: &S,
    keys: &CorrelationKeys<i64>,
) -> Result<BTreeMap<i64, Vec<DealTerm>>, FetchError> {
    let rows: Vec<PowerSwapVolumeRow> = fetch_keyed_rows(ledger, TERMS, keys).await?;
    Ok(group_by_key(rows.into_iter().map(|row| {
        let term = DealTerm {
            vol_seq: row.vol_seq,
            beg_date: row.beg_date,
            end_date: row.end_date,
            ..DealTerm::default()
        };
        (row.deal_key, term)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{day, header_row, window};
    use serde_json::{json, Value};
    use tlx_storage::testkit::ScriptedLedger;
    use tlx_storage::LedgerParams;

    fn swap_row(deal_key: i64, nonstd: &str, volume: f64, fixed_leg: bool) -> Value {
        let fix = if fixed_leg { json!("NYMEX") } else { Value::Null };
        header_row(
            deal_key,
            "PSWAP",
            json!({
                "total_quantity": 7440.0,
                "ib_portfolio_id": 88,
                "ib_portfolio": "EAST HEDGE",
                "ib_trader": "kchan",
                "pool": "PJM",
                "product": "7X24",
                "volume": volume,
                "fixed_price": 38.25,
                "nonstd_flag": nonstd,
                "publication": "PJM",
                "pub_index": "WESTERN HUB",
                "frequency": "MONTHLY",
                "fix_publication": fix,
                "fix_pub_index": "NG",
                "fix_frequency": "MONTHLY",
                "start_date": "2024-04-01",
                "end_date": "2024-06-30",
                "holiday_schedule": "NERC"
            }),
        )
    }

    #[tokio::test]
    async fn standard_swap_keeps_inline_term() {
        let ledger = ScriptedLedger::new()
            .with_rows("power_swap.headers", vec![swap_row(11, "N", -10.0, true)]);

        let headers = PowerSwapFetcher.fetch(&ledger, &window()).await.expect("fetch");
        let header = &headers[0];
        assert_eq!(header.direction, Direction::Sale);
        assert!(header.interaffiliate);
        assert_eq!(header.total_quantity, 7440.0);
        assert_eq!(header.ib_portfolio, "EAST HEDGE");
        assert_eq!(header.terms.len(), 1);

        let term = &header.terms[0];
        assert_eq!(term.vol_seq, 0);
        assert_eq!(term.beg_date, day(1));
        assert_eq!(term.volume, -10.0);
        assert_eq!(term.indexes1[0].index, "WESTERN HUB");
        assert_eq!(term.indexes2, vec![PriceIndex::new("NYMEX", "NG", "MONTHLY")]);
        assert_eq!(ledger.issued_names().await, vec!["power_swap.headers"]);
    }

    #[tokio::test]
    async fn non_standard_swap_terms_are_backfilled() {
        let ledger = ScriptedLedger::new()
            .with_rows(
                "power_swap.headers",
                vec![swap_row(11, "N", 5.0, false), swap_row(12, "Y", 5.0, false)],
            )
            .with_rows(
                "power_swap.terms",
                vec![
                    json!({"deal_key": 12, "vol_seq": 1, "beg_date": "2024-04-01", "end_date": "2024-04-30"}),
                    json!({"deal_key": 12, "vol_seq": 2, "beg_date": "2024-05-01", "end_date": "2024-05-31"}),
                ],
            );

        let headers = PowerSwapFetcher.fetch(&ledger, &window()).await.expect("fetch");
        assert_eq!(headers.iter().map(|h| h.deal_key).collect::<Vec<_>>(), vec![11, 12]);
        assert!(headers[0].terms[0].indexes2.is_empty());

        let spliced = &headers[1].terms;
        assert_eq!(spliced.len(), 2);
        for term in spliced {
            assert_eq!(term.pool1, "PJM");
            assert_eq!(term.product1, "7X24");
            assert_eq!(term.holiday_schedule, "NERC");
            assert_eq!(term.indexes1[0].publication, "PJM");
            assert_eq!(term.volume, 0.0);
        }
        assert_eq!(spliced[1].beg_date, NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"));

        let issued = ledger.issued().await;
        assert_eq!(issued[1].params, LedgerParams::Keys(vec![12]));
    }

    #[tokio::test]
    async fn non_standard_swap_without_terms_has_none() {
        let ledger = ScriptedLedger::new()
            .with_rows("power_swap.headers", vec![swap_row(12, "Y", 0.0, false)]);
        let headers = PowerSwapFetcher.fetch(&ledger, &window()).await.expect("fetch");
        assert!(headers[0].terms.is_empty());
        assert_eq!(headers[0].direction, Direction::Undetermined);
    }
}
