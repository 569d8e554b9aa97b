//! Power options (`POPTS`). One inline term per deal; the settle and strike
//! formulas are decoded into the two index slots.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{decode_formula, DealFamily, DealHeader, DealTerm, Direction};
use tlx_storage::{LedgerSource, Statement};

use crate::common::{interaffiliate, CommonColumns, ExecutionColumns};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

macro_rules! power_option_header_select {
    () => {
        concat!(
            "SELECT DISTINCT
            d.poption_key::bigint AS deal_key,
            'POPTS' AS deal_type,",
            common_columns!(),
            "
            (SELECT SUM(ABS(m.volume))::float8 FROM ledger.power_option_months m
                WHERE m.poption_key = d.poption_key) AS total_quantity,
            (SELECT MIN(m.gr_region) FROM ledger.power_option_months m
                WHERE m.poption_key = d.poption_key) AS region,
            d.tz_time_zone AS time_zone,
            d.tz_exercise_zone AS exercise_zone,
            d.ib_prt_portfolio::bigint AS ib_portfolio_id,
            ip.description AS ib_portfolio,
            d.ib_ur_trader AS ib_trader,
            d.ppep_pp_pool AS pool,
            d.ppep_pep_product AS product,
            d.ctp_point_code AS point_code,
            d.settle_formula,
            d.dy_beg_day AS start_date,
            d.dy_end_day AS end_date,
            d.sch_schedule AS holiday_schedule,
            d.volume::float8 AS volume,
            d.strike_price::float8 AS strike_price,
            d.strike_price_type,
            d.strike_formula,",
            execution_columns!(),
            "FROM ledger.power_options d
            LEFT JOIN ledger.portfolios ip ON ip.portfolio = d.ib_prt_portfolio",
            common_joins!("poption_key", "'POPTS'"),
            execution_attributes!("poption_key", "'POPTS'"),
        )
    };
}

pub const HEADERS: Statement = Statement::new(
    "power_option.headers",
    concat!(
        power_option_header_select!(),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2 OR fbf.modify_date > $2)
        ORDER BY deal_key"
    ),
);

pub const HEADERS_BY_KEYS: Statement = Statement::new(
    "power_option.headers_by_keys",
    concat!(
        power_option_header_select!(),
        "WHERE d.poption_key = ANY($1)
        ORDER BY deal_key"
    ),
);

#[derive(Debug, Deserialize, FromRow)]
struct PowerOptionRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    total_quantity: Option<f64>,
    exercise_zone: Option<String>,
    ib_portfolio_id: Option<i64>,
    ib_portfolio: Option<String>,
    ib_trader: Option<String>,
    pool: Option<String>,
    product: Option<String>,
    point_code: Option<String>,
    settle_formula: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    holiday_schedule: Option<String>,
    volume: Option<f64>,
    strike_price: Option<f64>,
    strike_price_type: Option<String>,
    strike_formula: Option<String>,
}

impl PowerOptionRow {
    fn into_header(self) -> Result<DealHeader, FetchError> {
        let deal_key = self.common.deal_key;
        let execution_time = self.execution.timestamp(deal_key)?;
        let volume = self.volume.unwrap_or_default();
        let settle_formula = self.settle_formula.unwrap_or_default();
        let strike_formula = self.strike_formula.unwrap_or_default();

        let mut header = self.common.into_header();
        header.direction = Direction::from_signed_volume(volume);
        header.interaffiliate = interaffiliate(&header);
        header.total_quantity = self.total_quantity.unwrap_or_default();
        header.exercise_zone = self.exercise_zone.unwrap_or_default();
        header.ib_portfolio_id = self.ib_portfolio_id.unwrap_or_default();
        header.ib_portfolio = self.ib_portfolio.unwrap_or_default();
        header.ib_trader = self.ib_trader.unwrap_or_default();
        header.start_date = self.start_date.unwrap_or_default();
        header.end_date = self.end_date.unwrap_or_default();
        header.execution_time = execution_time;
        header.exotic_flag = self.execution.exotic_flag_or_default();

        header.terms.push(DealTerm {
            vol_seq: 0,
            beg_date: header.start_date,
            end_date: header.end_date,
            price_type: self.strike_price_type.unwrap_or_default(),
            fixed_price: self.strike_price.unwrap_or_default(),
            volume,
            pool1: self.pool.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            point_code1: self.point_code.unwrap_or_default(),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            indexes1: decode_formula(&settle_formula).into_iter().collect(),
            indexes2: decode_formula(&strike_formula).into_iter().collect(),
            formula1: settle_formula,
            formula2: strike_formula,
            ..DealTerm::default()
        });
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PowerOptionFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for PowerOptionFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::PowerOption
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(
            DealFamily::PowerOption,
            selection,
            HEADERS,
            Some(HEADERS_BY_KEYS),
        )?;
        let rows: Vec<PowerOptionRow> = ledger.fetch_rows(&query).await?;
        rows.into_iter().map(PowerOptionRow::into_header).collect()
    }
}
