//! Columns and defaults shared by every family's header row.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use sqlx::FromRow;
use tlx_core::{parse_execution_date, parse_execution_timestamp, DealHeader};

use crate::FetchError;

/// Company short names that mark a deal as intercompany.
pub const INTERCOMPANY_DESIGNATIONS: [&str; 4] = ["SENA", "STRM", "SCAN", "SHECHE CAD"];

pub const NOT_APPLICABLE: &str = "NA";

/// Non-standard indicator value for deals whose single term sits on the header row.
pub const STANDARD_TERM_FLAG: &str = "N";

/// Both counterparties are internal designations and they differ.
pub fn interaffiliate(header: &DealHeader) -> bool {
    INTERCOMPANY_DESIGNATIONS.contains(&header.company.as_str())
        && INTERCOMPANY_DESIGNATIONS.contains(&header.legal_entity.as_str())
        && header.company_key != header.legal_entity_key
}

pub fn is_standard(nonstd_flag: Option<&str>) -> bool {
    nonstd_flag == Some(STANDARD_TERM_FLAG)
}

/// Combined execution timestamp; the default when either part is missing or blank.
pub fn execution_time(
    deal_key: i64,
    date: Option<&str>,
    time: Option<&str>,
) -> Result<NaiveDateTime, FetchError> {
    match (date, time) {
        (Some(date), Some(time)) if !date.is_empty() && !time.is_empty() => {
            parse_execution_timestamp(date, time)
                .into_result()
                .map_err(|source| FetchError::Timestamp { deal_key, source })
        }
        _ => Ok(NaiveDateTime::default()),
    }
}

/// Date-only execution column, at midnight.
pub fn execution_day(deal_key: i64, date: Option<&str>) -> Result<NaiveDateTime, FetchError> {
    match date {
        Some(date) if !date.is_empty() => parse_execution_date(date)
            .into_result()
            .map_err(|source| FetchError::Timestamp { deal_key, source }),
        _ => Ok(NaiveDateTime::default()),
    }
}

#[derive(Debug, Clone, Default, Deserialize, FromRow)]
#[serde(default)]
pub struct CommonColumns {
    pub deal_key: i64,
    pub deal_type: String,
    pub transaction_date: NaiveDate,
    pub company_key: i64,
    pub company: String,
    pub company_long_name: String,
    pub company_code: String,
    pub legal_entity: String,
    pub legal_entity_long_name: String,
    pub legal_entity_key: i64,
    pub contract: Option<String>,
    pub confirm_format: Option<String>,
    pub region: Option<String>,
    pub hedge_key: Option<String>,
    pub portfolio_id: i64,
    pub portfolio: String,
    pub trader: String,
    pub time_zone: Option<String>,
    pub broker_key: Option<i64>,
    pub broker: Option<String>,
    pub created_by: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub modified_by: Option<String>,
    pub modified_at: Option<NaiveDateTime>,
}

impl CommonColumns {
    /// Header with shared fields filled, not interaffiliate, exotic flag `NA`.
    pub fn into_header(self) -> DealHeader {
        DealHeader {
            deal_key: self.deal_key,
            deal_type: self.deal_type,
            transaction_date: self.transaction_date,
            company_key: self.company_key,
            company: self.company,
            company_long_name: self.company_long_name,
            company_code: self.company_code,
            legal_entity: self.legal_entity,
            legal_entity_long_name: self.legal_entity_long_name,
            legal_entity_key: self.legal_entity_key,
            contract: self.contract.unwrap_or_default(),
            confirm_format: self.confirm_format.unwrap_or_default(),
            region: self.region.unwrap_or_default(),
            hedge_key: self.hedge_key.unwrap_or_default(),
            portfolio_id: self.portfolio_id,
            portfolio: self.portfolio,
            trader: self.trader,
            time_zone: self.time_zone.unwrap_or_default(),
            has_broker: self.broker_key.is_some(),
            broker: self.broker.unwrap_or_else(|| NOT_APPLICABLE.to_string()),
            created_by: self.created_by.unwrap_or_default(),
            created_at: self.created_at.unwrap_or_default(),
            modified_by: self.modified_by.unwrap_or_default(),
            modified_at: self.modified_at.unwrap_or_default(),
            exotic_flag: NOT_APPLICABLE.to_string(),
            interaffiliate: false,
            ..DealHeader::default()
        }
    }
}

/// Deal-attribute columns joined by `execution_attributes!`.
#[derive(Debug, Clone, Default, Deserialize, FromRow)]
#[serde(default)]
pub struct ExecutionColumns {
    #[sqlx(default)]
    pub execution_date: Option<String>,
    #[sqlx(default)]
    pub execution_time: Option<String>,
    #[sqlx(default)]
    pub exotic_flag: Option<String>,
}

impl ExecutionColumns {
    pub fn timestamp(&self, deal_key: i64) -> Result<NaiveDateTime, FetchError> {
        execution_time(
            deal_key,
            self.execution_date.as_deref(),
            self.execution_time.as_deref(),
        )
    }

    pub fn exotic_flag_or_default(&self) -> String {
        self.exotic_flag
            .clone()
            .unwrap_or_else(|| NOT_APPLICABLE.to_string())
    }
}
