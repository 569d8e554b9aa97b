//! Point-to-point deals (`PTP`): a single hourly flow day priced off the
//! day-ahead and real-time publications.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction, PriceIndex};
use tlx_storage::{LedgerSource, Statement};

use crate::common::CommonColumns;
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

const HOURLY: &str = "HOURLY";

pub const HEADERS: Statement = Statement::new(
    "ptp.headers",
    concat!(
        "SELECT DISTINCT
        d.ptp_key::bigint AS deal_key,
        'PTP' AS deal_type,",
        common_columns!(),
        "
        (SELECT MIN(m.gr_region) FROM ledger.ptp_months m
            WHERE m.ptp_key = d.ptp_key) AS region,
        d.tz_time_zone AS time_zone,
        d.dy_flow_day AS flow_day,
        d.ppep_pp_pool AS pool,
        d.ppep_pep_product AS product,
        d.da_pi_pb_publication AS day_ahead_publication,
        d.poi_pi_pub_index AS poi_index,
        d.rt_pi_pb_publication AS real_time_publication,
        d.pow_pi_pub_index AS pow_index
        FROM ledger.ptp_deals d",
        common_joins!("ptp_key", "'PTP'"),
        "WHERE d.trade_date = $1
          AND (d.modify_date > $2 OR fbf.modify_date > $2)
        ORDER BY deal_key"
    ),
);

#[derive(Debug, Deserialize, FromRow)]
struct PointToPointRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    flow_day: Option<NaiveDate>,
    pool: Option<String>,
    product: Option<String>,
    day_ahead_publication: Option<String>,
    poi_index: Option<String>,
    real_time_publication: Option<String>,
    pow_index: Option<String>,
}

impl PointToPointRow {
    fn into_header(self) -> DealHeader {
        let mut header = self.common.into_header();
        header.direction = Direction::Purchase;
        header.confirm_format = String::new();

        let flow_day = self.flow_day.unwrap_or_default();
        header.terms.push(DealTerm {
            vol_seq: 0,
            beg_date: flow_day,
            end_date: flow_day,
            pool1: self.pool.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            indexes1: vec![PriceIndex::new(
                self.day_ahead_publication.unwrap_or_default(),
                self.poi_index.unwrap_or_default(),
                HOURLY,
            )],
            indexes2: vec![PriceIndex::new(
                self.real_time_publication.unwrap_or_default(),
                self.pow_index.unwrap_or_default(),
                HOURLY,
            )],
            ..DealTerm::default()
        });
        header
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PointToPointFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for PointToPointFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::PointToPoint
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::PointToPoint, selection, HEADERS, None)?;
        let rows: Vec<PointToPointRow> = ledger.fetch_rows(&query).await?;
        Ok(rows.into_iter().map(PointToPointRow::into_header).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{day, header_row, window};
    use serde_json::json;
    use tlx_storage::testkit::ScriptedLedger;

    #[tokio::test]
    async fn flow_day_term_carries_hourly_indexes() {
        let ledger = ScriptedLedger::new().with_rows(
            "ptp.headers",
            vec![header_row(
                77,
                "PTP",
                json!({
                    "flow_day": "2024-04-03",
                    "pool": "PJM",
                    "product": "HOURLY",
                    "day_ahead_publication": "PJM DA",
                    "poi_index": "AEP-DAYTON",
                    "real_time_publication": "PJM RT",
                    "pow_index": "WESTERN HUB"
                }),
            )],
        );

        let headers = PointToPointFetcher.fetch(&ledger, &window()).await.expect("fetch");
        let header = &headers[0];
        assert_eq!(header.direction, Direction::Purchase);
        assert_eq!(header.confirm_format, "");
        assert_eq!(header.exotic_flag, "NA");
        assert!(!header.interaffiliate);
        assert_eq!(header.execution_time, chrono::NaiveDateTime::default());

        let term = &header.terms[0];
        assert_eq!((term.beg_date, term.end_date), (day(3), day(3)));
        assert_eq!(term.indexes1, vec![PriceIndex::new("PJM DA", "AEP-DAYTON", "HOURLY")]);
        assert_eq!(term.indexes2, vec![PriceIndex::new("PJM RT", "WESTERN HUB", "HOURLY")]);
    }
}
