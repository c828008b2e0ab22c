//! Effective-dated platform rate and LTV policy
//!
//! Interest, provision and liquidation-fee rates are configuration inputs
//! consumed by the engine, never computed by it. Policy rows are
//! effective-dated with the same latest-as-of-date semantics as exchange
//! rates.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{EngineError, EngineResult};

/// One effective-dated policy row
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct PlatformConfig {
    pub id: i64,
    /// Annualized interest rate, integer percent
    pub interest_rate: BigDecimal,
    /// Lender provision (premium) rate, integer percent
    pub provision_rate: BigDecimal,
    /// Fee charged on forced liquidation, integer percent
    pub liquidation_fee_rate: BigDecimal,
    /// LTV percentage at which a margin call is issued
    pub margin_call_ltv_ratio: BigDecimal,
    pub effective_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Policy effective as of a date, or the latest when `as_of` is omitted
///
/// Ties on `effective_date` break by insertion order (highest id wins).
pub async fn latest_platform_config(
    pool: &PgPool,
    as_of: Option<DateTime<Utc>>,
) -> EngineResult<PlatformConfig> {
    let config = sqlx::query_as::<_, PlatformConfig>(
        r#"
        SELECT * FROM platform_configs
        WHERE ($1::TIMESTAMPTZ IS NULL OR effective_date <= $1)
        ORDER BY effective_date DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(as_of)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| EngineError::NotFound("No platform config is effective".to_string()))?;

    Ok(config)
}
