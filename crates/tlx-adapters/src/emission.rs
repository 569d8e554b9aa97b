//! Emission deals (`EMSSN`) and emission options (`EMOPTS`).
//!
//! Both read terms from `emission_volumes`. An option has no volumes of its
//! own: it takes the terms of its underlying emission deal, repriced at the
//! option's strike and volume.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{decode_formula, DealFamily, DealHeader, DealTerm, Direction};
use tlx_storage::{LedgerSource, Statement};

use crate::common::{CommonColumns, ExecutionColumns};
use crate::correlate::{fetch_keyed_rows, group_by_key, CorrelationKeys};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

pub const HEADERS: Statement = Statement::new(
    "emission.headers",
    concat!(
        "SELECT DISTINCT
        d.emission_key::bigint AS deal_key,
        'EMSSN' AS deal_type,
        d.dn_direction AS direction,",
        common_columns!(),
        "
        (SELECT MIN(m.gr_region) FROM ledger.emission_volume_months m
            WHERE m.ev_ed_emission_key = d.emission_key) AS region,
        NULL::text AS time_zone,",
        execution_columns!(),
        "FROM ledger.emission_deals d",
        common_joins!("emission_key", "'EMSSN'"),
        execution_attributes!("emission_key", "'EMSSN'"),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2
               OR fbf.modify_date > $2
               OR EXISTS (SELECT 1 FROM ledger.emission_volumes v
                          WHERE v.ed_emission_key = d.emission_key AND v.modify_date > $2))
        ORDER BY deal_key"
    ),
);

pub const TERMS: Statement = Statement::new(
    "emission.terms",
    "SELECT
        ed_emission_key::bigint AS deal_key,
        volume_seq::int AS vol_seq,
        dy_beg_day AS beg_date,
        dy_end_day AS end_date,
        price_type,
        price::float8 AS fixed_price,
        volume::float8 AS volume,
        epdt_emission_product AS product,
        ctp_point_code AS point_code,
        formula
    FROM ledger.emission_volumes
    WHERE ed_emission_key = ANY($1)
    ORDER BY ed_emission_key, volume_seq",
);

pub const OPTION_HEADERS: Statement = Statement::new(
    "emission_option.headers",
    concat!(
        "SELECT DISTINCT
        d.eoption_key::bigint AS deal_key,
        'EMOPTS' AS deal_type,",
        common_columns!(),
        "
        d.gr_region AS region,
        d.tz_exercise_zone AS time_zone,
        d.ed_emission_key::bigint AS emission_key,
        d.strike_price::float8 AS strike_price,
        d.volume::float8 AS volume,",
        execution_columns!(),
        "FROM ledger.emission_options d",
        common_joins!("eoption_key", "'EMOPTS'"),
        execution_attributes!("eoption_key", "'EMOPTS'"),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2
               OR fbf.modify_date > $2
               OR EXISTS (SELECT 1 FROM ledger.emission_volumes v
                          WHERE v.ed_emission_key = d.ed_emission_key AND v.modify_date > $2))
        ORDER BY deal_key"
    ),
);

pub const OPTION_TERMS: Statement = Statement::new(
    "emission_option.terms",
    "SELECT
        ed_emission_key::bigint AS deal_key,
        volume_seq::int AS vol_seq,
        dy_beg_day AS beg_date,
        dy_end_day AS end_date,
        ctp_point_code AS point_code,
        epdt_emission_product AS product
    FROM ledger.emission_volumes
    WHERE ed_emission_key = ANY($1)
    ORDER BY ed_emission_key, volume_seq",
);

#[derive(Debug, Deserialize, FromRow)]
struct EmissionRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    direction: Option<String>,
}

impl EmissionRow {
    fn into_header(self) -> Result<DealHeader, FetchError> {
        let execution_time = self.execution.timestamp(self.common.deal_key)?;
        let mut header = self.common.into_header();
        header.direction = self.direction.map(Direction::from).unwrap_or_default();
        header.execution_time = execution_time;
        Ok(header)
    }
}

#[derive(Debug, Deserialize, FromRow)]
struct EmissionVolumeRow {
    deal_key: i64,
    vol_seq: i32,
    beg_date: NaiveDate,
    end_date: NaiveDate,
    #[sqlx(default)]
    #[serde(default)]
    price_type: Option<String>,
    #[sqlx(default)]
    #[serde(default)]
    fixed_price: Option<f64>,
    #[sqlx(default)]
    #[serde(default)]
    volume: Option<f64>,
    product: Option<String>,
    point_code: Option<String>,
    #[sqlx(default)]
    #[serde(default)]
    formula: Option<String>,
}

impl EmissionVolumeRow {
    fn into_keyed(self) -> (i64, DealTerm) {
        let formula = self.formula.unwrap_or_default();
        let term = DealTerm {
            vol_seq: self.vol_seq,
            beg_date: self.beg_date,
            end_date: self.end_date,
            price_type: self.price_type.unwrap_or_default(),
            fixed_price: self.fixed_price.unwrap_or_default(),
            volume: self.volume.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            point_code1: self.point_code.unwrap_or_default(),
            indexes1: decode_formula(&formula).into_iter().collect(),
            formula1: formula,
            ..DealTerm::default()
        };
        (self.deal_key, term)
    }
}

#[derive(Debug, Deserialize, FromRow)]
struct EmissionOptionRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    emission_key: i64,
    strike_price: Option<f64>,
    volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmissionFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for EmissionFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::Emission
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::Emission, selection, HEADERS, None)?;
        let rows: Vec<EmissionRow> = ledger.fetch_rows(&query).await?;

        let keys: CorrelationKeys<i64> = rows.iter().map(|row| row.common.deal_key).collect();
        let mut headers = rows
            .into_iter()
            .map(EmissionRow::into_header)
            .collect::<Result<Vec<_>, _>>()?;

        let terms = fetch_terms(ledger, DealFamily::Emission, &keys).await?;
        for header in &mut headers {
            header.terms = terms.get(&header.deal_key).cloned().unwrap_or_default();
        }
        Ok(headers)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmissionOptionFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for EmissionOptionFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::EmissionOption
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::EmissionOption, selection, OPTION_HEADERS, None)?;
        let rows: Vec<EmissionOptionRow> = ledger.fetch_rows(&query).await?;

        let mut emission_keys = CorrelationKeys::new();
        let mut priced = Vec::with_capacity(rows.len());
        for row in rows {
            let execution_time = row.execution.timestamp(row.common.deal_key)?;
            let strike_price = row.strike_price.unwrap_or_default();
            let volume = row.volume.unwrap_or_default();
            emission_keys.push(row.emission_key);

            let mut header = row.common.into_header();
            header.direction = Direction::from_signed_volume(volume);
            header.execution_time = execution_time;
            priced.push((header, row.emission_key, strike_price, volume));
        }

        let underlying = fetch_terms(ledger, DealFamily::EmissionOption, &emission_keys).await?;
        let headers = priced
            .into_iter()
            .map(|(mut header, emission_key, strike_price, volume)| {
                header.terms = underlying
                    .get(&emission_key)
                    .into_iter()
                    .flatten()
                    .map(|term| DealTerm {
                        fixed_price: strike_price,
                        volume,
                        ..term.clone()
                    })
                    .collect();
                header
            })
            .collect();
        Ok(headers)
    }
}

/// Emission volumes keyed by emission deal key. Option lookups read the
/// narrower column set; pricing comes from the option row.
pub(crate) async fn fetch_terms<S: LedgerSource>(
    ledger: &S,
    family: DealFamily,
    keys: &CorrelationKeys<i64>,
) -> Result<BTreeMap<i64, Vec<DealTerm>>, FetchError> {
    let statement = match family {
        DealFamily::EmissionOption => OPTION_TERMS,
        _ => TERMS,
    };
    let rows: Vec<EmissionVolumeRow> = fetch_keyed_rows(ledger, statement, keys).await?;
    Ok(group_by_key(rows.into_iter().map(EmissionVolumeRow::into_keyed)))
}
