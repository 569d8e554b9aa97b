//! Miscellaneous charges (`MISC`). Charges carry no broker fees, no
//! execution attributes and no region; direction is payable or receivable.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{DealFamily, DealHeader, DealTerm, Direction};
use tlx_storage::{LedgerSource, Statement};

use crate::common::CommonColumns;
use crate::correlate::{fetch_keyed_rows, group_by_key, CorrelationKeys};
use crate::{primary_query, FetchError, HeaderFetcher, Selection};

pub const PAYABLE_FLAG: &str = "P";

pub const HEADERS: Statement = Statement::new(
    "misc_charge.headers",
    "SELECT DISTINCT
        d.misc_charge_key::bigint AS deal_key,
        'MISC' AS deal_type,
        d.rec_pay_flag,
        d.trade_date AS transaction_date,
        d.cy_company_key::bigint AS company_key,
        c.short_name AS company,
        c.long_name AS company_long_name,
        COALESCE(c.company_code, c.short_name) AS company_code,
        l.short_name AS legal_entity,
        l.long_name AS legal_entity_long_name,
        d.lgl_cy_entity_key::bigint AS legal_entity_key,
        cn.contract_number AS contract,
        '' AS confirm_format,
        NULL::text AS region,
        d.hs_hedge_key AS hedge_key,
        d.prt_portfolio::bigint AS portfolio_id,
        p.description AS portfolio,
        d.ur_trader AS trader,
        NULL::text AS time_zone,
        NULL::bigint AS broker_key,
        '' AS broker,
        d.create_user AS created_by,
        d.create_date AS created_at,
        d.modify_user AS modified_by,
        d.modify_date AS modified_at
    FROM ledger.misc_charges d
    INNER JOIN ledger.companies c ON c.company_key = d.cy_company_key
    INNER JOIN ledger.companies l ON l.company_key = d.lgl_cy_entity_key
    INNER JOIN ledger.portfolios p ON p.portfolio = d.prt_portfolio
    LEFT JOIN ledger.contracts cn ON cn.contract_key = d.kk_contract_key
    WHERE d.trade_date = $1
      AND d.modify_date > $2
    ORDER BY deal_key",
);

pub const TERMS: Statement = Statement::new(
    "misc_charge.terms",
    "SELECT
        mc_misc_charge_key::bigint AS deal_key,
        misc_vol_seq::int AS vol_seq,
        dy_beg_day AS beg_date,
        dy_end_day AS end_date,
        int_volume::float8 AS volume
    FROM ledger.misc_charge_volumes
    WHERE mc_misc_charge_key = ANY($1)
    ORDER BY mc_misc_charge_key, misc_vol_seq",
);

#[derive(Debug, Deserialize, FromRow)]
struct MiscChargeRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    common: CommonColumns,
    rec_pay_flag: Option<String>,
}

impl MiscChargeRow {
    fn into_header(self) -> DealHeader {
        let direction = match self.rec_pay_flag.as_deref() {
            Some(PAYABLE_FLAG) => "Payable",
            _ => "Receivable",
        };
        let mut header = self.common.into_header();
        header.direction = Direction::Other(direction.to_string());
        header
    }
}

#[derive(Debug, Deserialize, FromRow)]
struct MiscChargeVolumeRow {
    deal_key: i64,
    vol_seq: i32,
    beg_date: NaiveDate,
    end_date: NaiveDate,
    volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MiscChargeFetcher;

#[async_trait]
impl<S: LedgerSource> HeaderFetcher<S> for MiscChargeFetcher {
    fn family(&self) -> DealFamily {
        DealFamily::MiscCharge
    }

    async fn fetch(&self, ledger: &S, selection: &Selection) -> Result<Vec<DealHeader>, FetchError> {
        let query = primary_query(DealFamily::MiscCharge, selection, HEADERS, None)?;
        let rows: Vec<MiscChargeRow> = ledger.fetch_rows(&query).await?;

        let keys: CorrelationKeys<i64> = rows.iter().map(|row| row.common.deal_key).collect();
        let mut headers: Vec<DealHeader> =
            rows.into_iter().map(MiscChargeRow::into_header).collect();

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
    let rows: Vec<MiscChargeVolumeRow> = fetch_keyed_rows(ledger, TERMS, keys).await?;
    Ok(group_by_key(rows.into_iter().map(|row| {
        let term = DealTerm {
            vol_seq: row.vol_seq,
            beg_date: row.beg_date,
            end_date: row.end_date,
            volume: row.volume.unwrap_or_default(),
            ..DealTerm::default()
        };
        (row.deal_key, term)
    })))
}
