//! Physical power deals (`PWR`).
//!
//! Every deal's terms live in `power_volumes`. Terms with a pricing formula
//! are matched to their index rows by (deal key, volume sequence).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction};
use tlx_storage::{LedgerSource, Statement};

use crate::common::{CommonColumns, ExecutionColumns};
use crate::correlate::{
    fetch_keyed_rows, fetch_sequenced_rows, group_by_key, CorrelationKeys, IndexColumns, IndexRow,
};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

macro_rules! power_header_select {
    () => {
        concat!(
            "SELECT DISTINCT
            d.power_key::bigint AS deal_key,
            d.dlt_deal_type AS deal_type,
            d.dn_direction AS direction,",
            common_columns!(),
            "
            (SELECT MIN(m.gr_region) FROM ledger.power_volume_months m
                WHERE m.pv_pd_power_key = d.power_key) AS region,
            d.tz_time_zone AS time_zone,
            d.option_key::bigint AS option_key,",
            execution_columns!(),
            "FROM ledger.power_deals d",
            common_joins!("power_key", "d.dlt_deal_type"),
            execution_attributes!("power_key", "d.dlt_deal_type"),
        )
    };
}

pub const HEADERS: Statement = Statement::new(
    "power.headers",
    concat!(
        power_header_select!(),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2
               OR fbf.modify_date > $2
               OR EXISTS (SELECT 1 FROM ledger.power_volumes v
                          WHERE v.pd_power_key = d.power_key AND v.modify_date > $2))
        ORDER BY deal_key"
    ),
);

pub const HEADERS_BY_KEYS: Statement = Statement::new(
    "power.headers_by_keys",
    concat!(
        power_header_select!(),
        "WHERE d.power_key = ANY($1)
        ORDER BY deal_key"
    ),
);

pub const TERMS: Statement = Statement::new(
    "power.terms",
    "SELECT
        pd_power_key::bigint AS deal_key,
        volume_seq::int AS vol_seq,
        dy_beg_day AS beg_date,
        dy_end_day AS end_date,
        price_type,
        price::float8 AS fixed_price,
        volume::float8 AS volume,
        ppep_pp_pool AS pool,
        ppep_pep_product AS product,
        ctp_point_code AS point_code,
        formula,
        sch_schedule AS holiday_schedule
    FROM ledger.power_volumes
    WHERE pd_power_key = ANY($1)
    ORDER BY pd_power_key, volume_seq",
);

pub const INDEXES: Statement = Statement::new(
    "power.indexes",
    "SELECT
        pv_pd_power_key::bigint AS deal_key,
        pv_volume_seq::int AS vol_seq,
        pif_pi_pb_publication AS publication,
        pif_pi_pub_index AS pub_index,
        pif_frq_frequency AS frequency
    FROM ledger.power_volume_indexes
    WHERE (pv_pd_power_key, pv_volume_seq) IN (SELECT * FROM UNNEST($1::bigint[], $2::int[]))
    ORDER BY pv_pd_power_key, pv_volume_seq",
);

#[derive(Debug, Deserialize, FromRow)]
struct PowerRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    direction: Option<String>,
    option_key: Option<i64>,
}

impl PowerRow {
    fn into_header(self) -> Result<DealHeader, FetchError> {
        let deal_key = self.common.deal_key;
        let execution_time = self.execution.timestamp(deal_key)?;
        let mut header = self.common.into_header();
        header.direction = self.direction.map(Direction::from).unwrap_or_default();
        header.exercised_option_key = self.option_key.unwrap_or_default();
        header.execution_time = execution_time;
        header.exotic_flag = self.execution.exotic_flag_or_default();
        Ok(header)
    }
}

#[derive(Debug, Deserialize, FromRow)]
struct PowerVolumeRow {
    deal_key: i64,
    vol_seq: i32,
    beg_date: NaiveDate,
    end_date: NaiveDate,
    price_type: Option<String>,
    fixed_price: Option<f64>,
    volume: Option<f64>,
    pool: Option<String>,
    product: Option<String>,
    point_code: Option<String>,
    formula: Option<String>,
    holiday_schedule: Option<String>,
}

impl PowerVolumeRow {
    fn into_keyed(self) -> (i64, DealTerm) {
        let term = DealTerm {
            vol_seq: self.vol_seq,
            beg_date: self.beg_date,
            end_date: self.end_date,
            price_type: self.price_type.unwrap_or_default(),
            fixed_price: self.fixed_price.unwrap_or_default(),
            volume: self.volume.unwrap_or_default(),
            pool1: self.pool.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            point_code1: self.point_code.unwrap_or_default(),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            formula1: self.formula.unwrap_or_default(),
            ..DealTerm::default()
        };
        (self.deal_key, term)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PowerFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for PowerFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::Power
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::Power, selection, HEADERS, Some(HEADERS_BY_KEYS))?;
        let rows: Vec<PowerRow> = ledger.fetch_rows(&query).await?;

        let mut keys = CorrelationKeys::new();
        let mut headers = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(row.common.deal_key);
            headers.push(row.into_header()?);
        }

        let terms = fetch_terms(ledger, &keys).await?;
        for header in &mut headers {
            header.terms = terms.get(&header.deal_key).cloned().unwrap_or_default();
        }
        Ok(headers)
    }
}

/// Terms per deal key, with formula terms carrying their index rows in `indexes1`.
pub(crate) async fn fetch_terms<S: LedgerSource>(
    ledger: &S,
    keys: &CorrelationKeys<i64>,
) -> Result<BTreeMap<i64, Vec<DealTerm>>, FetchError> {
    let rows: Vec<PowerVolumeRow> = fetch_keyed_rows(ledger, TERMS, keys).await?;

    let mut formula_keys = CorrelationKeys::new();
    let mut terms = group_by_key(rows.into_iter().map(PowerVolumeRow::into_keyed));
    for (deal_key, group) in &terms {
        for term in group.iter().filter(|term| !term.formula1.is_empty()) {
            formula_keys.push((*deal_key, term.vol_seq));
        }
    }

    let indexes = fetch_indexes(ledger, &formula_keys).await?;
    for (deal_key, index_rows) in indexes {
        let Some(group) = terms.get_mut(&deal_key) else {
            continue;
        };
        for row in index_rows {
            for term in group.iter_mut().filter(|term| term.vol_seq == row.vol_seq) {
                term.indexes1.push(row.index.clone());
            }
        }
    }
    Ok(terms)
}

pub(crate) async fn fetch_indexes<S: LedgerSource>(
    ledger: &S,
    keys: &CorrelationKeys<(i64, i32)>,
) -> Result<BTreeMap<i64, Vec<IndexRow>>, FetchError> {
    let rows: Vec<IndexColumns> = fetch_sequenced_rows(ledger, INDEXES, keys).await?;
    Ok(group_by_key(rows.into_iter().map(IndexColumns::into_keyed)))
}
