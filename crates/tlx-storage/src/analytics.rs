//! Analytics store: extraction watermarks, processed trades, risk mappings
//! and the LAR credit base list.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tlx_core::{DealFamily, LarBaseEntry, PortfolioRiskMapping, ProcessedTrade, Watermark};
use tracing::debug;

use crate::StoreError;

#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Latest watermark for the family and trade date, by run id.
    async fn get_cursor(
        &self,
        family: DealFamily,
        trade_date: NaiveDate,
    ) -> Result<Option<Watermark>, StoreError>;

    /// Appends a watermark. Earlier rows for the same key are kept.
    async fn put_cursor(
        &self,
        family: DealFamily,
        trade_date: NaiveDate,
        cutoff: NaiveDateTime,
    ) -> Result<Watermark, StoreError>;
}

#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn upsert_processed_trades(&self, trades: &[ProcessedTrade]) -> Result<u64, StoreError>;
}

#[derive(Debug, FromRow)]
struct WatermarkRow {
    run_id: i64,
    trade_date: NaiveDate,
    deal_type: String,
    cutoff: NaiveDateTime,
    created_at: DateTime<Utc>,
}

impl WatermarkRow {
    fn into_watermark(self) -> Result<Watermark, StoreError> {
        let family = self
            .deal_type
            .parse::<DealFamily>()
            .map_err(|err| StoreError::Decode {
                query: "analytics.extraction_runs".into(),
                message: err.to_string(),
            })?;
        Ok(Watermark {
            run_id: self.run_id,
            trade_date: self.trade_date,
            family,
            cutoff: self.cutoff,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RiskMappingRow {
    source_system: String,
    portfolio: String,
    legal_entity: Option<String>,
}

#[derive(Debug, Default, FromRow)]
struct LarBaseRow {
    short_name: Option<String>,
    counterparty_long_name: Option<String>,
    parent_company: Option<String>,
    product: Option<String>,
    source_system: Option<String>,
    deal_type: Option<String>,
    netting_agreement: Option<String>,
    agreement_type_per_csa: Option<String>,
    our_threshold: Option<f64>,
    counterparty_threshold: Option<f64>,
    buy_tenor: Option<String>,
    sell_tenor: Option<String>,
    gross_exposure: Option<f64>,
    collateral: Option<f64>,
    net_position: Option<f64>,
    limit_value: Option<f64>,
    limit_currency: Option<String>,
    limit_availability: Option<String>,
    exposure_limit: Option<f64>,
    expiration_date: Option<NaiveDate>,
    market_type: Option<String>,
    industry_code: Option<String>,
    sp_rating: Option<String>,
    moody_rating: Option<String>,
    final_internal_rating: Option<String>,
    final_rating: Option<String>,
    equifax: Option<String>,
    amended_by: Option<String>,
    effective_date: Option<NaiveDateTime>,
    review_date: Option<NaiveDateTime>,
    dodd_frank_classification: Option<String>,
    report_created_date: Option<NaiveDateTime>,
    boost: Option<f64>,
    trading_entity: Option<String>,
    legal_entity: Option<String>,
    agmt: Option<String>,
    csa: Option<String>,
    tenor: Option<String>,
    credit_limit: Option<String>,
    reporting_date: NaiveDate,
    created_at: Option<NaiveDateTime>,
}

impl LarBaseRow {
    fn into_entry(self) -> LarBaseEntry {
        LarBaseEntry {
            short_name: self.short_name.unwrap_or_default(),
            counterparty_long_name: self.counterparty_long_name.unwrap_or_default(),
            parent_company: self.parent_company.unwrap_or_default(),
            product: self.product.unwrap_or_default(),
            source_system: self.source_system.unwrap_or_default(),
            deal_type: self.deal_type.unwrap_or_default(),
            netting_agreement: self.netting_agreement.unwrap_or_default(),
            agreement_type_per_csa: self.agreement_type_per_csa.unwrap_or_default(),
            our_threshold: self.our_threshold.unwrap_or_default(),
            counterparty_threshold: self.counterparty_threshold.unwrap_or_default(),
            buy_tenor: self.buy_tenor.unwrap_or_default(),
            sell_tenor: self.sell_tenor.unwrap_or_default(),
            gross_exposure: self.gross_exposure.unwrap_or_default(),
            collateral: self.collateral.unwrap_or_default(),
            net_position: self.net_position.unwrap_or_default(),
            limit_value: self.limit_value.unwrap_or_default(),
            limit_currency: self.limit_currency.unwrap_or_default(),
            limit_availability: self.limit_availability.unwrap_or_default(),
            exposure_limit: self.exposure_limit.unwrap_or_default(),
            expiration_date: self.expiration_date.unwrap_or_default(),
            market_type: self.market_type.unwrap_or_default(),
            industry_code: self.industry_code.unwrap_or_default(),
            sp_rating: self.sp_rating.unwrap_or_default(),
            moody_rating: self.moody_rating.unwrap_or_default(),
            final_internal_rating: self.final_internal_rating.unwrap_or_default(),
            final_rating: self.final_rating.unwrap_or_default(),
            equifax: self.equifax.unwrap_or_default(),
            amended_by: self.amended_by.unwrap_or_default(),
            effective_date: self.effective_date.unwrap_or_default(),
            review_date: self.review_date.unwrap_or_default(),
            dodd_frank_classification: self.dodd_frank_classification.unwrap_or_default(),
            report_created_date: self.report_created_date.unwrap_or_default(),
            boost: self.boost.unwrap_or_default(),
            trading_entity: self.trading_entity.unwrap_or_default(),
            legal_entity: self.legal_entity.unwrap_or_default(),
            agmt: self.agmt.unwrap_or_default(),
            csa: self.csa.unwrap_or_default(),
            tenor: self.tenor.unwrap_or_default(),
            credit_limit: self.credit_limit.unwrap_or_default(),
            reporting_date: self.reporting_date,
            created_at: self.created_at.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgAnalytics {
    pool: PgPool,
}

impl PgAnalytics {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn portfolio_risk_mappings(
        &self,
        source_system: &str,
    ) -> Result<Vec<PortfolioRiskMapping>, StoreError> {
        let rows = sqlx::query_as::<_, RiskMappingRow>(
            r#"
            SELECT source_system, portfolio, legal_entity
            FROM analytics.portfolio_risk_mappings
            WHERE source_system = $1
            ORDER BY portfolio
            "#,
        )
        .bind(source_system)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PortfolioRiskMapping {
                source_system: row.source_system,
                portfolio: row.portfolio,
                legal_entity: row.legal_entity.unwrap_or_default(),
            })
            .collect())
    }

    /// The LAR base list of the latest reporting date (today when the table
    /// is empty), with legal entities resolved for `source_system`.
    pub async fn lar_base_list(&self, source_system: &str) -> Result<Vec<LarBaseEntry>, StoreError> {
        let rows = sqlx::query_as::<_, LarBaseRow>(
            r#"
            SELECT lb.short_name, lb.counterparty_long_name, lb.parent_company, lb.product,
                   lb.source_system, lb.deal_type, lb.netting_agreement, lb.agreement_type_per_csa,
                   lb.our_threshold, lb.counterparty_threshold, lb.buy_tenor, lb.sell_tenor,
                   lb.gross_exposure, lb.collateral, lb.net_position, lb.limit_value,
                   lb.limit_currency, lb.limit_availability, lb.exposure_limit, lb.expiration_date,
                   lb.market_type, lb.industry_code, lb.sp_rating, lb.moody_rating,
                   lb.final_internal_rating, lb.final_rating, lb.equifax, lb.amended_by,
                   lb.effective_date, lb.review_date, lb.dodd_frank_classification,
                   lb.report_created_date, lb.boost, lb.trading_entity,
                   lps.legal_entity, lb.agmt, lb.csa, lb.tenor, lb.credit_limit,
                   lb.reporting_date, lb.created_at
            FROM analytics.lar_base lb
            LEFT JOIN analytics.lar_product_source_refs lps
                ON lps.product_name = lb.product AND lps.source_system = $1
            WHERE lb.reporting_date = (
                SELECT COALESCE(MAX(reporting_date), CURRENT_DATE) FROM analytics.lar_base
            )
            ORDER BY lb.short_name, lb.product
            "#,
        )
        .bind(source_system)
        .fetch_all(&self.pool)
        .await?;

        debug!(rows = rows.len(), source_system, "lar base list read");
        Ok(rows.into_iter().map(LarBaseRow::into_entry).collect())
    }
}

#[async_trait]
impl CursorStore for PgAnalytics {
    async fn get_cursor(
        &self,
        family: DealFamily,
        trade_date: NaiveDate,
    ) -> Result<Option<Watermark>, StoreError> {
        let row = sqlx::query_as::<_, WatermarkRow>(
            r#"
            SELECT run_id, trade_date, deal_type, cutoff, created_at
            FROM analytics.extraction_runs
            WHERE deal_type = $1 AND trade_date = $2
            ORDER BY run_id DESC
            LIMIT 1
            "#,
        )
        .bind(family.tag())
        .bind(trade_date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WatermarkRow::into_watermark).transpose()
    }

    async fn put_cursor(
        &self,
        family: DealFamily,
        trade_date: NaiveDate,
        cutoff: NaiveDateTime,
    ) -> Result<Watermark, StoreError> {
        let row = sqlx::query_as::<_, WatermarkRow>(
            r#"
            INSERT INTO analytics.extraction_runs (trade_date, deal_type, cutoff, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING run_id, trade_date, deal_type, cutoff, created_at
            "#,
        )
        .bind(trade_date)
        .bind(family.tag())
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        debug!(family = %family, run_id = row.run_id, "watermark appended");
        row.into_watermark()
    }
}

#[async_trait]
impl TradeSink for PgAnalytics {
    async fn upsert_processed_trades(&self, trades: &[ProcessedTrade]) -> Result<u64, StoreError> {
        if trades.is_empty() {
            return Ok(0);
        }

        let mut trade_ids = Vec::with_capacity(trades.len());
        let mut deal_types = Vec::with_capacity(trades.len());
        let mut portfolio_ids = Vec::with_capacity(trades.len());
        let mut transaction_dates = Vec::with_capacity(trades.len());
        let mut details = Vec::with_capacity(trades.len());
        let mut detected = Vec::with_capacity(trades.len());
        let mut results = Vec::with_capacity(trades.len());
        let mut parameters = Vec::with_capacity(trades.len());
        for trade in trades {
            trade_ids.push(trade.trade_id);
            deal_types.push(trade.deal_type.clone());
            portfolio_ids.push(trade.portfolio_id);
            transaction_dates.push(trade.transaction_date);
            details.push(trade.trade_detail.clone());
            detected.push(trade.anomaly_detected);
            results.push(trade.anomaly_test_result.clone());
            parameters.push(trade.model_parameters.clone());
        }

        let outcome = sqlx::query(
            r#"
            INSERT INTO analytics.processed_trades (
                trade_id, deal_type, portfolio_id, transaction_date, trade_detail,
                anomaly_detected, anomaly_test_result, model_parameters
            )
            SELECT t.trade_id, t.deal_type, t.portfolio_id, t.transaction_date, t.trade_detail::jsonb,
                   t.anomaly_detected, t.anomaly_test_result, t.model_parameters
            FROM UNNEST(
                $1::bigint[], $2::text[], $3::bigint[], $4::date[],
                $5::text[], $6::bool[], $7::text[], $8::text[]
            ) AS t(
                trade_id, deal_type, portfolio_id, transaction_date,
                trade_detail, anomaly_detected, anomaly_test_result, model_parameters
            )
            ON CONFLICT (trade_id, deal_type) DO UPDATE SET
                portfolio_id = EXCLUDED.portfolio_id,
                transaction_date = EXCLUDED.transaction_date,
                trade_detail = EXCLUDED.trade_detail,
                anomaly_detected = EXCLUDED.anomaly_detected,
                anomaly_test_result = EXCLUDED.anomaly_test_result,
                model_parameters = EXCLUDED.model_parameters,
                updated_at = NOW()
            "#,
        )
        .bind(trade_ids)
        .bind(deal_types)
        .bind(portfolio_ids)
        .bind(transaction_dates)
        .bind(details)
        .bind(detected)
        .bind(results)
        .bind(parameters)
        .execute(&self.pool)
        .await?;

        debug!(rows = outcome.rows_affected(), "processed trades upserted");
        Ok(outcome.rows_affected())
    }
}
