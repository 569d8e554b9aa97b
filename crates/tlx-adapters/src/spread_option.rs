//! Spread options (`SPDOPT`): two legs on one inline term, each leg's
//! formula decoded into its own index slot.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{decode_formula, DealFamily, DealHeader, DealTerm, Direction};
use tlx_storage::{LedgerSource, Statement};

use crate::common::{CommonColumns, ExecutionColumns};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

pub const POINT_NOT_APPLICABLE: &str = "NOT APPLICABLE";

pub const HEADERS: Statement = Statement::new(
    "spread_option.headers",
    concat!(
        "SELECT DISTINCT
        d.spread_option_key::bigint AS deal_key,
        'SPDOPT' AS deal_type,",
        common_columns!(),
        "
        (SELECT MIN(m.gr_region) FROM ledger.spread_option_months m
            WHERE m.spread_option_key = d.spread_option_key) AS region,
        NULL::text AS time_zone,
        d.ib_prt_portfolio::bigint AS ib_portfolio_id,
        ip.description AS ib_portfolio,
        d.ib_ur_trader AS ib_trader,
        d.dy_beg_day1 AS start_date,
        d.dy_end_day1 AS end_date,
        d.sch_schedule AS holiday_schedule,
        d.formula1,
        d.formula2,
        d.ppep_pp_pool1 AS pool1,
        d.ppep_pp_pool2 AS pool2,
        d.ppep_pep_product1 AS product1,
        d.ppep_pep_product2 AS product2,
        d.ctp_point_code1 AS point_code1,
        d.volume::float8 AS volume,
        d.strike_price::float8 AS strike_price,",
        execution_columns!(),
        "FROM ledger.spread_options d
        LEFT JOIN ledger.portfolios ip ON ip.portfolio = d.ib_prt_portfolio",
        common_joins!("spread_option_key", "'SPDOPT'"),
        execution_attributes!("spread_option_key", "'SPDOPT'"),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2 OR fbf.modify_date > $2)
        ORDER BY deal_key"
    ),
);

#[derive(Debug, Deserialize, FromRow)]
struct SpreadOptionRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    ib_portfolio_id: Option<i64>,
    ib_portfolio: Option<String>,
    ib_trader: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    holiday_schedule: Option<String>,
    formula1: Option<String>,
    formula2: Option<String>,
    pool1: Option<String>,
    pool2: Option<String>,
    product1: Option<String>,
    product2: Option<String>,
    point_code1: Option<String>,
    volume: Option<f64>,
    strike_price: Option<f64>,
}

impl SpreadOptionRow {
    fn into_header(self) -> Result<DealHeader, FetchError> {
        let execution_time = self.execution.timestamp(self.common.deal_key)?;
        let volume = self.volume.unwrap_or_default();
        let formula1 = self.formula1.unwrap_or_default();
        let formula2 = self.formula2.unwrap_or_default();

        let mut header = self.common.into_header();
        header.direction = Direction::from_signed_volume(volume);
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
            fixed_price: self.strike_price.unwrap_or_default(),
            volume,
            pool1: self.pool1.unwrap_or_default(),
            pool2: self.pool2.unwrap_or_default(),
            product1: self.product1.unwrap_or_default(),
            product2: self.product2.unwrap_or_default(),
            point_code1: self
                .point_code1
                .unwrap_or_else(|| POINT_NOT_APPLICABLE.to_string()),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            indexes1: decode_formula(&formula1).into_iter().collect(),
            indexes2: decode_formula(&formula2).into_iter().collect(),
            formula1,
            formula2,
            ..DealTerm::default()
        });
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadOptionFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for SpreadOptionFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::SpreadOption
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::SpreadOption, selection, HEADERS, None)?;
        let rows: Vec<SpreadOptionRow> = ledger.fetch_rows(&query).await?;
        rows.into_iter().map(SpreadOptionRow::into_header).collect()
    }
}
