//! Heat-rate swaps (`HRSWPS`).

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction, PriceIndex};
use tlx_storage::{LedgerSource, Statement};

use crate::common::{interaffiliate, CommonColumns, ExecutionColumns};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

pub const HEADERS: Statement = Statement::new(
    "heat_rate_swap.headers",
    concat!(
        "SELECT DISTINCT
        d.hrswps_key::bigint AS deal_key,
        'HRSWPS' AS deal_type,",
        common_columns!(),
        "
        (SELECT SUM(ABS(m.volume1 + m.r_volume1))::float8 FROM ledger.heat_rate_swap_months m
            WHERE m.hrswps_key = d.hrswps_key) AS total_quantity,
        (SELECT MIN(m.gr_region) FROM ledger.heat_rate_swap_months m
            WHERE m.hrswps_key = d.hrswps_key) AS region,
        NULL::text AS time_zone,
        d.option_key::bigint AS option_key,
        d.ppep_pp_pool AS pool,
        d.ppep_pep_product AS product,
        d.pif_pi_pb_publication1 AS publication1,
        d.pif_pi_pub_index1 AS pub_index1,
        d.pif_pi_pb_publication2 AS publication2,
        d.pif_pi_pub_index2 AS pub_index2,
        d.pif_frq_frequency2 AS frequency2,
        d.dy_beg_day AS start_date,
        d.dy_end_day AS end_date,
        d.sch_schedule AS holiday_schedule,
        d.volume1::float8 AS volume1,",
        execution_columns!(),
        "FROM ledger.heat_rate_swaps d",
        common_joins!("hrswps_key", "'HRSWPS'"),
        execution_attributes!("hrswps_key", "'HRSWPS'"),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2 OR fbf.modify_date > $2)
        ORDER BY deal_key"
    ),
);

#[derive(Debug, Deserialize, FromRow)]
struct HeatRateSwapRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    #[sqlx(flatten)]
    #[serde(flatten)]
    execution: ExecutionColumns,
    total_quantity: Option<f64>,
    option_key: Option<i64>,
    pool: Option<String>,
    product: Option<String>,
    publication1: Option<String>,
    pub_index1: Option<String>,
    publication2: Option<String>,
    pub_index2: Option<String>,
    frequency2: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    holiday_schedule: Option<String>,
    volume1: Option<f64>,
}

impl HeatRateSwapRow {
    fn into_header(self) -> Result<DealHeader, FetchError> {
        let execution_time = self.execution.timestamp(self.common.deal_key)?;
        let volume = self.volume1.unwrap_or_default();

        let mut header = self.common.into_header();
        header.direction = Direction::from_signed_volume(volume);
        header.interaffiliate = interaffiliate(&header);
        header.total_quantity = self.total_quantity.unwrap_or_default();
        header.exercised_option_key = self.option_key.unwrap_or_default();
        header.start_date = self.start_date.unwrap_or_default();
        header.end_date = self.end_date.unwrap_or_default();
        header.execution_time = execution_time;

        header.terms.push(DealTerm {
            vol_seq: 0,
            beg_date: header.start_date,
            end_date: header.end_date,
            volume,
            pool1: self.pool.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            indexes1: vec![PriceIndex::new(
                self.publication1.unwrap_or_default(),
                self.pub_index1.unwrap_or_default(),
                "",
            )],
            indexes2: vec![PriceIndex::new(
                self.publication2.unwrap_or_default(),
                self.pub_index2.unwrap_or_default(),
                self.frequency2.unwrap_or_default(),
            )],
            ..DealTerm::default()
        });
        Ok(header)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeatRateSwapFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for HeatRateSwapFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::HeatRateSwap
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::HeatRateSwap, selection, HEADERS, None)?;
        let rows: Vec<HeatRateSwapRow> = ledger.fetch_rows(&query).await?;
        rows.into_iter().map(HeatRateSwapRow::into_header).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{header_row, window};
    use serde_json::json;
    use tlx_storage::testkit::ScriptedLedger;

    #[tokio::test]
    async fn heat_rate_legs_map_to_index_slots() {
        let ledger = ScriptedLedger::new().with_rows(
            "heat_rate_swap.headers",
            vec![header_row(
                15,
                "HRSWPS",
                json!({
                    "time_zone": null,
                    "total_quantity": 12000.0,
                    "option_key": 3,
                    "pool": "ERCOT",
                    "product": "7X24",
                    "publication1": "ERCOT RT",
                    "pub_index1": "HB_HOUSTON",
                    "publication2": "GD",
                    "pub_index2": "HSC",
                    "frequency2": "DAILY",
                    "start_date": "2024-04-01",
                    "end_date": "2024-04-30",
                    "volume1": 16.0,
                    "exotic_flag": "Y"
                }),
            )],
        );

        let headers = HeatRateSwapFetcher.fetch(&ledger, &window()).await.expect("fetch");
        let header = &headers[0];
        assert_eq!(header.direction, Direction::Purchase);
        assert!(header.interaffiliate);
        assert_eq!(header.exercised_option_key, 3);
        assert_eq!(header.exotic_flag, "NA");
        assert_eq!(header.time_zone, "");

        let term = &header.terms[0];
        assert_eq!(term.volume, 16.0);
        assert_eq!(term.indexes1, vec![PriceIndex::new("ERCOT RT", "HB_HOUSTON", "")]);
        assert_eq!(term.indexes2, vec![PriceIndex::new("GD", "HSC", "DAILY")]);
    }

    #[tokio::test]
    async fn missing_volume_is_undetermined() {
        let ledger = ScriptedLedger::new().with_rows(
            "heat_rate_swap.headers",
            vec![header_row(16, "HRSWPS", json!({ "volume1": null }))],
        );
        let headers = HeatRateSwapFetcher.fetch(&ledger, &window()).await.expect("fetch");
        assert_eq!(headers[0].direction, Direction::Undetermined);
        assert_eq!(headers[0].terms[0].volume, 0.0);
        assert_eq!(headers[0].terms[0].indexes2.len(), 1);
    }
}
