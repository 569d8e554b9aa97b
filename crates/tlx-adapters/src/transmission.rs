//! Transmission deals (`TRANS`). Each volume row moves energy from one
//! pool/point to another at a fixed price.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction};
use tlx_storage::{LedgerSource, Statement};

use crate::common::{execution_day, CommonColumns};
use crate::correlate::{fetch_keyed_rows, group_by_key, CorrelationKeys};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

const FIXED_PRICE_TYPE: &str = "F";

pub const HEADERS: Statement = Statement::new(
    "transmission.headers",
    concat!(
        "SELECT DISTINCT
        d.trans_key::bigint AS deal_key,
        'TRANS' AS deal_type,
        d.dn_direction AS direction,",
        common_columns!(),
        "
        (SELECT MIN(m.gr_fm_region) FROM ledger.trans_volume_months m
            WHERE m.tv_td_trans_key = d.trans_key) AS region,
        d.tz_time_zone AS time_zone,
        COALESCE(df.field_value, '01/01/1900') AS execution_date
        FROM ledger.transmission_deals d",
        common_joins!("trans_key", "'TRANS'"),
        "
        LEFT JOIN ledger.deal_attributes df
            ON df.deal_key = d.trans_key AND df.dlt_deal_type = 'TRANS'
            AND df.field_name = 'EXECUTION_TIMESTAMP'
        WHERE d.trade_date = $1
          AND (d.modify_date > $2
               OR fbf.modify_date > $2
               OR EXISTS (SELECT 1 FROM ledger.trans_volumes v
                          WHERE v.td_trans_key = d.trans_key AND v.modify_date > $2))
        ORDER BY deal_key"
    ),
);

pub const TERMS: Statement = Statement::new(
    "transmission.terms",
    "SELECT
        td_trans_key::bigint AS deal_key,
        volume_seq::int AS vol_seq,
        dy_beg_day AS beg_date,
        dy_end_day AS end_date,
        volume::float8 AS volume,
        ppep_pep_product AS product,
        ppep_pp_fm_pool AS from_pool,
        ctp_fm_point_code AS from_point_code,
        ppep_pp_to_pool AS to_pool,
        ctp_to_point_code AS to_point_code,
        sch_schedule AS holiday_schedule
    FROM ledger.trans_volumes
    WHERE td_trans_key = ANY($1)
    ORDER BY td_trans_key, volume_seq",
);

#[derive(Debug, Deserialize, FromRow)]
struct TransmissionRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    direction: Option<String>,
    execution_date: Option<String>,
}

impl TransmissionRow {
    fn into_header(self) -> Result<DealHeader, FetchError> {
        let execution_time = execution_day(self.common.deal_key, self.execution_date.as_deref())?;
        let mut header = self.common.into_header();
        header.direction = self.direction.map(Direction::from).unwrap_or_default();
        header.execution_time = execution_time;
        Ok(header)
    }
}

#[derive(Debug, Deserialize, FromRow)]
struct TransmissionVolumeRow {
    deal_key: i64,
    vol_seq: i32,
    beg_date: NaiveDate,
    end_date: NaiveDate,
    volume: Option<f64>,
    product: Option<String>,
    from_pool: Option<String>,
    from_point_code: Option<String>,
    to_pool: Option<String>,
    to_point_code: Option<String>,
    holiday_schedule: Option<String>,
}

impl TransmissionVolumeRow {
    fn into_keyed(self) -> (i64, DealTerm) {
        let term = DealTerm {
            vol_seq: self.vol_seq,
            beg_date: self.beg_date,
            end_date: self.end_date,
            price_type: FIXED_PRICE_TYPE.to_string(),
            volume: self.volume.unwrap_or_default(),
            product1: self.product.unwrap_or_default(),
            pool1: self.from_pool.unwrap_or_default(),
            point_code1: self.from_point_code.unwrap_or_default(),
            pool2: self.to_pool.unwrap_or_default(),
            point_code2: self.to_point_code.unwrap_or_default(),
            holiday_schedule: self.holiday_schedule.unwrap_or_default(),
            ..DealTerm::default()
        };
        (self.deal_key, term)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransmissionFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for TransmissionFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::Transmission
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::Transmission, selection, HEADERS, None)?;
        let rows: Vec<TransmissionRow> = ledger.fetch_rows(&query).await?;

        let keys: CorrelationKeys<i64> = rows.iter().map(|row| row.common.deal_key).collect();
        let mut headers = rows
            .into_iter()
            .map(TransmissionRow::into_header)
            .collect::<Result<Vec<_>, _>>()?;

        let terms = fetch_terms(ledger, &keys).await?;
        for header in &mut headers {
            header.terms = terms.get(&header.deal_key).cloned().unwrap_or_default();
        }
        Ok(headers)
    }
}

pub(crate) async fn fetch_terms<S: LedgerSource>(
    ledger: &S,
    keys: &CorrelationKeys<i64>,
) -> Result<BTreeMap<i64, Vec<DealTerm>>, FetchError> {
    let rows: Vec<TransmissionVolumeRow> = fetch_keyed_rows(ledger, TERMS, keys).await?;
    Ok(group_by_key(rows.into_iter().map(TransmissionVolumeRow::into_keyed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{header_row, window};
    use chrono::NaiveDateTime;
    use serde_json::json;
    use tlx_storage::testkit::ScriptedLedger;

    #[tokio::test]
    async fn transmission_terms_carry_both_ends() {
        let ledger = ScriptedLedger::new()
            .with_rows(
                "transmission.headers",
                vec![
                    header_row(
                        200,
                        "TRANS",
                        json!({"direction": "PURCHASE", "execution_date": "2024-03-14"}),
                    ),
                    header_row(
                        201,
                        "TRANS",
                        json!({"direction": "SALE", "execution_date": "01/01/1900"}),
                    ),
                ],
            )
            .with_rows(
                "transmission.terms",
                vec![json!({
                    "deal_key": 200,
                    "vol_seq": 1,
                    "beg_date": "2024-04-01",
                    "end_date": "2024-04-30",
                    "volume": 50.0,
                    "product": "FIRM",
                    "from_pool": "BPA",
                    "from_point_code": "JOHN DAY",
                    "to_pool": "CAISO",
                    "to_point_code": "MALIN",
                    "holiday_schedule": "NERC"
                })],
            );

        let headers = TransmissionFetcher.fetch(&ledger, &window()).await.expect("fetch");
        let first = &headers[0];
        assert_eq!(first.execution_time.to_string(), "2024-03-14 00:00:00");
        assert_eq!(first.exotic_flag, "NA");
        let term = &first.terms[0];
        assert_eq!(term.price_type, "F");
        assert_eq!((term.pool1.as_str(), term.point_code1.as_str()), ("BPA", "JOHN DAY"));
        assert_eq!((term.pool2.as_str(), term.point_code2.as_str()), ("CAISO", "MALIN"));

        let second = &headers[1];
        assert_eq!(second.direction, Direction::Sale);
        assert!(second.terms.is_empty());
        assert_ne!(second.execution_time, NaiveDateTime::default());
        assert_eq!(second.execution_time.to_string(), "1900-01-01 00:00:00");
    }

    #[tokio::test]
    async fn unparseable_execution_day_aborts() {
        let ledger = ScriptedLedger::new().with_rows(
            "transmission.headers",
            vec![header_row(202, "TRANS", json!({"execution_date": "March 14"}))],
        );
        let err = TransmissionFetcher.fetch(&ledger, &window()).await.expect_err("abort");
        assert!(matches!(err, FetchError::Timestamp { deal_key: 202, .. }));
    }
}
