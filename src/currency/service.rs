//! Read-only currency and exchange-rate resolution
//!
//! Pure lookups, no transactions. The engine only reads already-computed
//! rates; price-feed ingestion happens elsewhere.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::currency::model::{Currency, CurrencyPair, ExchangeRate};
use crate::error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct CurrencyService {
    db_pool: PgPool,
}

impl CurrencyService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Look up a currency by its natural key
    pub async fn get_currency(
        &self,
        blockchain_key: &str,
        token_id: &str,
    ) -> EngineResult<Currency> {
        let currency = sqlx::query_as::<_, Currency>(
            "SELECT * FROM currencies WHERE blockchain_key = $1 AND token_id = $2",
        )
        .bind(blockchain_key)
        .bind(token_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            EngineError::NotFound(format!("Currency {}/{} not found", blockchain_key, token_id))
        })?;

        Ok(currency)
    }

    /// Look up a currency by id
    pub async fn get_currency_by_id(&self, id: i64) -> EngineResult<Currency> {
        let currency = sqlx::query_as::<_, Currency>("SELECT * FROM currencies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Currency {} not found", id)))?;

        Ok(currency)
    }

    /// Resolve both legs of a loan's currency pair
    ///
    /// One round-trip; a missing leg fails the whole resolution, never a
    /// partial result.
    pub async fn resolve_pair(
        &self,
        principal_currency_id: i64,
        collateral_currency_id: i64,
    ) -> EngineResult<CurrencyPair> {
        let rows = sqlx::query_as::<_, Currency>(
            "SELECT * FROM currencies WHERE id = $1 OR id = $2",
        )
        .bind(principal_currency_id)
        .bind(collateral_currency_id)
        .fetch_all(&self.db_pool)
        .await?;

        let principal = rows.iter().find(|c| c.id == principal_currency_id);
        let collateral = rows.iter().find(|c| c.id == collateral_currency_id);

        match (principal, collateral) {
            (Some(principal), Some(collateral)) => Ok(CurrencyPair {
                principal: principal.clone(),
                collateral: collateral.clone(),
            }),
            _ => Err(EngineError::CurrencyPairNotFound(format!(
                "principal currency {} / collateral currency {}",
                principal_currency_id, collateral_currency_id
            ))),
        }
    }

    /// Most recent rate for a pair, optionally at or before `as_of`
    ///
    /// Ties on `source_date` break by insertion order: the last written row
    /// wins. With no `as_of`, the globally latest rate is returned.
    pub async fn latest_rate(
        &self,
        base_currency_id: i64,
        quote_currency_id: i64,
        as_of: Option<DateTime<Utc>>,
    ) -> EngineResult<ExchangeRate> {
        let rate = sqlx::query_as::<_, ExchangeRate>(
            r#"
            SELECT * FROM exchange_rates
            WHERE base_currency_id = $1
              AND quote_currency_id = $2
              AND ($3::TIMESTAMPTZ IS NULL OR source_date <= $3)
            ORDER BY source_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(base_currency_id)
        .bind(quote_currency_id)
        .bind(as_of)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            EngineError::NotFound(format!(
                "No exchange rate for pair {}/{}{}",
                base_currency_id,
                quote_currency_id,
                as_of
                    .map(|d| format!(" as of {}", d))
                    .unwrap_or_default()
            ))
        })?;

        Ok(rate)
    }
}
