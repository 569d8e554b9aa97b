//! Capacity deals (`CAPCTY`).
//!
//! Term ranges and index rows carry no sequence column; both are numbered by
//! position within their deal.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction};
use tlx_storage::{LedgerSource, Statement};
use tracing::warn;

use crate::common::{interaffiliate, CommonColumns, ExecutionColumns};
use crate::correlate::{
    classify, fetch_keyed_rows, group_positional, splice, CorrelationKeys, IndexColumns, IndexRow,
    RowTerm,
};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

pub const HEADERS: Statement = Statement::new(
    "capacity.headers",
    concat!(
        "SELECT DISTINCT
        d.capacity_key::bigint AS deal_key,
        'CAPCTY' AS deal_type,
        d.dn_direction AS direction,",
        common_columns!(),
        "
        (SELECT SUM(ABS(m.volume))::float8 FROM ledger.capacity_deal_months m
            WHERE m.cpd_capacity_key = d.capacity_key) AS total_quantity,
        (SELECT MIN(m.gr_region) FROM ledger.capacity_deal_months m
            WHERE m.cpd_capacity_key = d.capacity_key) AS region,
        d.tz_time_zone AS time_zone,
        d.non_standard_flag AS nonstd_flag,
        d.price_type,
        d.charge::float8 AS charge,
        d.volume::float8 AS volume,
        d.energy_formula,
        d.ppcp_pp_pool AS pool,
        d.ppcp_pcp_product AS product,
        d.ctp_point_code AS point_code,
        d.dy_beg_day AS start_date,
        d.dy_end_day AS end_date,
        d.sch_schedule AS holiday_schedule,",
        execution_columns!(),
        "FROM ledger.capacity_deals d",
        common_joins!("capacity_key", "'CAPCTY'"),
        execution_attributes!("capacity_key", "'CAPCTY'"),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2 OR fbf.modify_date > $2)
        ORDER BY deal_key"
    ),
);

pub const TERMS: Statement = Statement::new(
    "capacity.terms",
    "SELECT
        cpd_capacity_key::bigint AS deal_key,
        dy_beg_day AS beg_date,
        dy_end_day AS end_date
    FROM ledger.capacity_volume_ranges
    WHERE cpd_capacity_key = ANY($1)
    ORDER BY cpd_capacity_key, dy_beg_day",
);

pub const INDEXES: Statement = Statement::new(
    "capacity.indexes",
    "SELECT
        cpd_capacity_key::bigint AS deal_key,
        pif_pi_pb_publication AS publication,
        pif_pi_pub_index AS pub_index,
        pif_frq_frequency AS frequency
    FROM ledger.capacity_deal_indexes
    WHERE cpd_capacity_key = ANY($1)
    ORDER BY cpd_capacity_key",
);

#[derive(Debug, Deserialize, FromRow)]
struct CapacityRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    direction: Option<String>,
    total_quantity: Option<f64>,
    nonstd_flag: Option<String>,
    price_type: Option<String>,
    charge: Option<f64>,
    volume: Option<f64>,
    energy_formula: Option<String>,
    pool: Option<String>,
    product: Option<String>,
    point_code: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    holiday_schedule: Option<String>,
}

impl CapacityRow {
    /// Header, its row term, and whether the deal carries an energy formula.
    fn into_parts(self) -> Result<(DealHeader, RowTerm, bool), FetchError> {
        let deal_key = self.common.deal_key;
        let execution_time = self.execution.timestamp(deal_key)?;
        let has_formula = self.energy_formula.is_some();

        let mut header = self.common.into_header();
        header.direction = self.direction.map(Direction::from).unwrap_or_default();
        header.interaffiliate = interaffiliate(&header);
        header.total_quantity = self.total_quantity.unwrap_or_default();
        header.start_date = self.start_date.unwrap_or_default();
        header.end_date = self.end_date.unwrap_or_default();
        header.execution_time = execution_time;

        let term = DealTerm {
            beg_date: header.start_date,
            end_date: header.end_date,
            price_type: self.price_type.unwrap_or_default(),
            fixed_price: self.charge.unwrap_or_default(),
            volume: self.volume.unwrap_or_default(),
            pool1: self.pool.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            point_code1: self.point_code.unwrap_or_default(),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            formula1: self.energy_formula.unwrap_or_default(),
            ..DealTerm::default()
        };
        let term = RowTerm::from_flag(self.nonstd_flag.as_deref(), term);
        Ok((header, term, has_formula))
    }
}

#[derive(Debug, Deserialize, FromRow)]
struct CapacityRangeRow {
    deal_key: i64,
    beg_date: NaiveDate,
    end_date: NaiveDate,
}

fn backfill(initial: &DealTerm, term: &mut DealTerm) {
    term.price_type = initial.price_type.clone();
    term.pool1 = initial.pool1.clone();
    term.product1 = initial.product1.clone();
    term.point_code1 = initial.point_code1.clone();
    term.holiday_schedule = initial.holiday_schedule.clone();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CapacityFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for CapacityFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::Capacity
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::Capacity, selection, HEADERS, None)?;
        let rows: Vec<CapacityRow> = ledger.fetch_rows(&query).await?;

        let mut formula_keys = CorrelationKeys::new();
        let mut parts = Vec::with_capacity(rows.len());
        for row in rows {
            let (header, term, has_formula) = row.into_parts()?;
            if has_formula {
                formula_keys.push(header.deal_key);
            }
            parts.push((header, term));
        }

        let classified = classify(parts);
        let fetched = fetch_terms(ledger, &classified.needs_lookup).await?;
        let mut headers = splice(classified, &fetched, backfill);

        let indexes = fetch_indexes(ledger, &formula_keys).await?;
        for header in &mut headers {
            let Some(rows) = indexes.get(&header.deal_key) else {
                continue;
            };
            match header.terms.first_mut() {
                Some(first) => first.indexes1 = rows.iter().map(|row| row.index.clone()).collect(),
                None => warn!(
                    deal_key = header.deal_key,
                    indexes = rows.len(),
                    "capacity indexes dropped, deal has no terms"
                ),
            }
        }
        Ok(headers)
    }
}

pub(crate) async fn fetch_terms<S: LedgerSource>(
    ledger: &S,
    keys: &CorrelationKeys<i64>,
) -> Result<BTreeMap<i64, Vec<DealTerm>>, FetchError> {
    let rows: Vec<CapacityRangeRow> = fetch_keyed_rows(ledger, TERMS, keys).await?;
    group_positional(
        rows.into_iter().map(|row| {
            let term = DealTerm {
                beg_date: row.beg_date,
                end_date: row.end_date,
                ..DealTerm::default()
            };
            (row.deal_key, term)
        }),
        |term, seq| term.vol_seq = seq,
    )
}

pub(crate) async fn fetch_indexes<S: LedgerSource>(
    ledger: &S,
    keys: &CorrelationKeys<i64>,
) -> Result<BTreeMap<i64, Vec<IndexRow>>, FetchError> {
    let rows: Vec<IndexColumns> = fetch_keyed_rows(ledger, INDEXES, keys).await?;
    group_positional(
        rows.into_iter().map(IndexColumns::into_keyed),
        |row, seq| row.vol_seq = seq,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{day, header_row, window};
    use serde_json::{json, Value};
    use tlx_core::PriceIndex;
    use tlx_storage::testkit::ScriptedLedger;
    use tlx_storage::LedgerParams;

    fn capacity_row(deal_key: i64, nonstd: &str, formula: Option<&str>) -> Value {
        header_row(
            deal_key,
            "CAPCTY",
            json!({
                "direction": "PURCHASE",
                "total_quantity": 300.0,
                "nonstd_flag": nonstd,
                "price_type": "F",
                "charge": 4.75,
                "volume": 100.0,
                "energy_formula": formula,
                "pool": "CAISO",
                "product": "RA",
                "point_code": "SP15",
                "start_date": "2024-04-01",
                "end_date": "2024-06-30",
                "holiday_schedule": "NONE"
            }),
        )
    }

    fn range(deal_key: i64, beg: u32, end: u32) -> Value {
        json!({
            "deal_key": deal_key,
            "beg_date": format!("2024-04-{beg:02}"),
            "end_date": format!("2024-04-{end:02}")
        })
    }

    fn index(deal_key: i64, pub_index: &str) -> Value {
        json!({
            "deal_key": deal_key,
            "publication": "PLATTS",
            "pub_index": pub_index,
            "frequency": "MONTHLY"
        })
    }

    #[tokio::test]
    async fn ranges_are_numbered_by_position_and_backfilled() {
        let ledger = ScriptedLedger::new()
            .with_rows("capacity.headers", vec![capacity_row(40, "Y", None)])
            .with_rows(
                "capacity.terms",
                vec![range(40, 1, 10), range(40, 11, 20), range(40, 21, 30)],
            );

        let headers = CapacityFetcher.fetch(&ledger, &window()).await.expect("fetch");
        let header = &headers[0];
        assert_eq!(header.deal_type, "CAPCTY");
        assert_eq!(header.direction, Direction::Purchase);
        assert!(header.interaffiliate);
        assert_eq!(header.exotic_flag, "NA");

        let seqs: Vec<i32> = header.terms.iter().map(|t| t.vol_seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(header.terms[1].beg_date, day(11));
        for term in &header.terms {
            assert_eq!(term.price_type, "F");
            assert_eq!(term.pool1, "CAISO");
            assert_eq!(term.point_code1, "SP15");
            assert_eq!(term.holiday_schedule, "NONE");
            assert_eq!(term.fixed_price, 0.0);
        }
        assert_eq!(ledger.issued_names().await, vec!["capacity.headers", "capacity.terms"]);
    }

    #[tokio::test]
    async fn energy_formula_indexes_land_on_first_term() {
        let ledger = ScriptedLedger::new()
            .with_rows(
                "capacity.headers",
                vec![
                    capacity_row(41, "N", Some("[PLATTS|SP15|MONTHLY]")),
                    capacity_row(42, "Y", Some("")),
                ],
            )
            .with_rows("capacity.terms", vec![range(42, 1, 15), range(42, 16, 30)])
            .with_rows(
                "capacity.indexes",
                vec![index(41, "SP15"), index(41, "NP15"), index(42, "ZP26")],
            );

        let headers = CapacityFetcher.fetch(&ledger, &window()).await.expect("fetch");

        let inline = &headers[0].terms;
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].fixed_price, 4.75);
        assert_eq!(inline[0].formula1, "[PLATTS|SP15|MONTHLY]");
        assert_eq!(
            inline[0].indexes1,
            vec![
                PriceIndex::new("PLATTS", "SP15", "MONTHLY"),
                PriceIndex::new("PLATTS", "NP15", "MONTHLY"),
            ]
        );

        let spliced = &headers[1].terms;
        assert_eq!(spliced[0].indexes1, vec![PriceIndex::new("PLATTS", "ZP26", "MONTHLY")]);
        assert!(spliced[1].indexes1.is_empty());

        let issued = ledger.issued().await;
        assert_eq!(issued[2].params, LedgerParams::Keys(vec![41, 42]));
    }

    #[tokio::test]
    async fn indexes_for_termless_deal_are_dropped() {
        let ledger = ScriptedLedger::new()
            .with_rows("capacity.headers", vec![capacity_row(43, "Y", Some("x"))])
            .with_rows("capacity.indexes", vec![index(43, "SP15")]);

        let headers = CapacityFetcher.fetch(&ledger, &window()).await.expect("fetch");
        assert!(headers[0].terms.is_empty());
    }

    #[tokio::test]
    async fn index_rows_are_numbered_by_position() {
        let ledger = ScriptedLedger::new()
            .with_rows("capacity.indexes", vec![index(7, "A"), index(8, "B"), index(7, "C")]);
        let keys: CorrelationKeys<i64> = [7, 8].into_iter().collect();
        let grouped = fetch_indexes(&ledger, &keys).await.expect("indexes");
        assert_eq!(grouped[&7].iter().map(|r| r.vol_seq).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(grouped[&7][1].index.index, "C");
        assert_eq!(grouped[&8][0].vol_seq, 0);
    }
}
