//! Core trade model for TLX: reconstructed ledger deals, their terms and price indexes.

pub mod formula;
pub mod timestamp;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use formula::decode_formula;
pub use timestamp::{parse_execution_date, parse_execution_timestamp, LayoutAttempt, TimestampError};

pub const CRATE_NAME: &str = "tlx-core";

/// Scored label the anomaly models use for a flagged deal.
pub const FLAGGED_LABEL: &str = "NO";

/// Ledger sub-types extracted through the TCC/FTR fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TccFtrKind {
    FtrOption,
    FtrSwap,
    TccSwap,
}

impl TccFtrKind {
    pub fn deal_type(self) -> &'static str {
        match self {
            TccFtrKind::FtrOption => "FTROPT",
            TccFtrKind::FtrSwap => "FTRSWP",
            TccFtrKind::TccSwap => "TCCSWP",
        }
    }
}

/// Deal families the ledger stores in separate table groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DealFamily {
    Power,
    PowerSwap,
    PowerOption,
    Capacity,
    PointToPoint,
    Emission,
    EmissionOption,
    SpreadOption,
    HeatRateSwap,
    TccFtr(TccFtrKind),
    Transmission,
    MiscCharge,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown deal family `{0}`")]
pub struct UnknownFamily(pub String);

impl DealFamily {
    pub const ALL: [DealFamily; 14] = [
        DealFamily::Power,
        DealFamily::PowerSwap,
        DealFamily::PowerOption,
        DealFamily::Capacity,
        DealFamily::PointToPoint,
        DealFamily::Emission,
        DealFamily::EmissionOption,
        DealFamily::SpreadOption,
        DealFamily::HeatRateSwap,
        DealFamily::TccFtr(TccFtrKind::FtrOption),
        DealFamily::TccFtr(TccFtrKind::FtrSwap),
        DealFamily::TccFtr(TccFtrKind::TccSwap),
        DealFamily::Transmission,
        DealFamily::MiscCharge,
    ];

    /// Tag used for watermarks, reports and the command line.
    pub fn tag(self) -> &'static str {
        match self {
            DealFamily::Power => "PWR",
            DealFamily::PowerSwap => "PSWAP",
            DealFamily::PowerOption => "POPTS",
            DealFamily::Capacity => "CAPCTY",
            DealFamily::PointToPoint => "PTP",
            DealFamily::Emission => "EMSSN",
            DealFamily::EmissionOption => "EMOPTS",
            DealFamily::SpreadOption => "SPDOPT",
            DealFamily::HeatRateSwap => "HRSWPS",
            DealFamily::TccFtr(kind) => kind.deal_type(),
            DealFamily::Transmission => "TRANS",
            DealFamily::MiscCharge => "MISC",
        }
    }
}

impl fmt::Display for DealFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DealFamily {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let family = match normalized.as_str() {
            "pwr" | "power" => DealFamily::Power,
            "pswap" | "power-swap" => DealFamily::PowerSwap,
            "popts" | "power-option" => DealFamily::PowerOption,
            "capcty" | "capacity" => DealFamily::Capacity,
            "ptp" | "point-to-point" => DealFamily::PointToPoint,
            "emssn" | "emission" => DealFamily::Emission,
            "emopts" | "emission-option" => DealFamily::EmissionOption,
            "spdopt" | "spread-option" => DealFamily::SpreadOption,
            "hrswps" | "heat-rate-swap" => DealFamily::HeatRateSwap,
            "ftropt" | "ftr-option" => DealFamily::TccFtr(TccFtrKind::FtrOption),
            "ftrswp" | "ftr-swap" => DealFamily::TccFtr(TccFtrKind::FtrSwap),
            "tccswp" | "tcc-swap" => DealFamily::TccFtr(TccFtrKind::TccSwap),
            "trans" | "transmission" => DealFamily::Transmission,
            "misc" | "misc-charge" => DealFamily::MiscCharge,
            _ => return Err(UnknownFamily(s.to_string())),
        };
        Ok(family)
    }
}

impl TryFrom<String> for DealFamily {
    type Error = UnknownFamily;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DealFamily> for String {
    fn from(family: DealFamily) -> Self {
        family.tag().to_string()
    }
}

/// Trade direction as the ledger reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Direction {
    Purchase,
    Sale,
    #[default]
    Undetermined,
    /// Free-text directions such as `Payable` / `Receivable`.
    Other(String),
}

impl Direction {
    pub fn from_signed_volume(volume: f64) -> Self {
        if volume > 0.0 {
            Direction::Purchase
        } else if volume < 0.0 {
            Direction::Sale
        } else {
            Direction::Undetermined
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Direction::Purchase => "PURCHASE",
            Direction::Sale => "SALE",
            Direction::Undetermined => "UNDETERMINED",
            Direction::Other(value) => value,
        }
    }
}

impl From<String> for Direction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PURCHASE" => Direction::Purchase,
            "SALE" => Direction::Sale,
            "UNDETERMINED" => Direction::Undetermined,
            _ => Direction::Other(value),
        }
    }
}

impl From<Direction> for String {
    fn from(direction: Direction) -> Self {
        direction.as_str().to_string()
    }
}

/// Decoded reference to an external price series.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PriceIndex {
    pub publication: String,
    pub index: String,
    pub frequency: String,
}

impl PriceIndex {
    pub fn new(
        publication: impl Into<String>,
        index: impl Into<String>,
        frequency: impl Into<String>,
    ) -> Self {
        Self {
            publication: publication.into(),
            index: index.into(),
            frequency: frequency.into(),
        }
    }
}

/// One pricing/volume period of a deal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DealTerm {
    pub vol_seq: i32,
    pub beg_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price_type: String,
    pub fixed_price: f64,
    pub volume: f64,
    pub pool1: String,
    pub product1: String,
    pub point_code1: String,
    pub pool2: String,
    pub product2: String,
    pub point_code2: String,
    pub holiday_schedule: String,
    pub formula1: String,
    pub formula2: String,
    pub indexes1: Vec<PriceIndex>,
    pub indexes2: Vec<PriceIndex>,
}

/// A deal rebuilt from its header row and correlated term rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DealHeader {
    pub deal_key: i64,
    pub deal_type: String,
    pub direction: Direction,
    pub transaction_date: NaiveDate,
    pub company_key: i64,
    pub company: String,
    pub company_long_name: String,
    pub company_code: String,
    pub legal_entity: String,
    pub legal_entity_long_name: String,
    pub legal_entity_key: i64,
    pub contract: String,
    pub confirm_format: String,
    pub region: String,
    pub hedge_key: String,
    pub portfolio_id: i64,
    pub portfolio: String,
    pub trader: String,
    pub ib_portfolio_id: i64,
    pub ib_portfolio: String,
    pub ib_trader: String,
    pub time_zone: String,
    pub exercise_zone: String,
    pub has_broker: bool,
    pub broker: String,
    pub exercised_option_key: i64,
    pub total_quantity: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub modified_by: String,
    pub modified_at: NaiveDateTime,
    pub execution_time: NaiveDateTime,
    pub exotic_flag: String,
    pub interaffiliate: bool,
    pub terms: Vec<DealTerm>,
}

/// Cutoff recorded after a successful extraction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub run_id: i64,
    pub trade_date: NaiveDate,
    pub family: DealFamily,
    pub cutoff: NaiveDateTime,
    pub created_at: DateTime<Utc>,
}

/// One anomaly-model verdict for a deal.
///
/// Fields other than the model name, message and label are kept verbatim in
/// `payload` so the serialized finding round-trips whatever the scorer sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub model_name: String,
    pub message: String,
    pub scored_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_key: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deal_type: Option<String>,
    #[serde(flatten)]
    pub payload: BTreeMap<String, serde_json::Value>,
}

impl Finding {
    pub fn is_flagged(&self) -> bool {
        self.scored_label == FLAGGED_LABEL
    }
}

/// Findings per deal key, in the order the scorer produced them.
pub type Findings = BTreeMap<i64, Vec<Finding>>;

/// Flattened upsert row for one reconstructed deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTrade {
    pub trade_id: i64,
    pub deal_type: String,
    pub portfolio_id: i64,
    pub transaction_date: NaiveDate,
    pub trade_detail: String,
    pub anomaly_detected: bool,
    pub anomaly_test_result: Option<String>,
    pub model_parameters: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioRiskMapping {
    pub source_system: String,
    pub portfolio: String,
    pub legal_entity: String,
}

/// One counterparty/product row of the latest LAR (limits and ratings)
/// credit report. Missing columns take neutral defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LarBaseEntry {
    pub short_name: String,
    pub counterparty_long_name: String,
    pub parent_company: String,
    pub product: String,
    pub source_system: String,
    pub deal_type: String,
    pub netting_agreement: String,
    pub agreement_type_per_csa: String,
    pub our_threshold: f64,
    pub counterparty_threshold: f64,
    pub buy_tenor: String,
    pub sell_tenor: String,
    pub gross_exposure: f64,
    pub collateral: f64,
    pub net_position: f64,
    pub limit_value: f64,
    pub limit_currency: String,
    pub limit_availability: String,
    pub exposure_limit: f64,
    pub expiration_date: NaiveDate,
    pub market_type: String,
    pub industry_code: String,
    pub sp_rating: String,
    pub moody_rating: String,
    pub final_internal_rating: String,
    pub final_rating: String,
    pub equifax: String,
    pub amended_by: String,
    pub effective_date: NaiveDateTime,
    pub review_date: NaiveDateTime,
    pub dodd_frank_classification: String,
    pub report_created_date: NaiveDateTime,
    pub boost: f64,
    pub trading_entity: String,
    /// Legal entity mapped from the product for the requesting source system.
    pub legal_entity: String,
    pub agmt: String,
    pub csa: String,
    pub tenor: String,
    pub credit_limit: String,
    pub reporting_date: NaiveDate,
    pub created_at: NaiveDateTime,
}
