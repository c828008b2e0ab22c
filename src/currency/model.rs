//! Currency and exchange-rate models

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// A fungible asset, identified by its (blockchain_key, token_id) natural key
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Currency {
    pub id: i64,
    pub blockchain_key: String,
    pub token_id: String,
    pub symbol: String,
    pub name: String,
    /// On-chain decimal places; immutable once a loan references the currency
    pub decimals: i32,
    pub initial_ltv_ratio: BigDecimal,
    pub margin_call_ltv_ratio: BigDecimal,
    pub liquidation_ltv_ratio: BigDecimal,
    pub min_amount: BigDecimal,
    pub max_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A bid/ask quote for a currency pair at a point in time
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ExchangeRate {
    pub id: i64,
    pub price_feed_id: String,
    pub base_currency_id: i64,
    pub quote_currency_id: i64,
    /// Prices are 18-decimal scaled integers, bid_price <= ask_price
    pub bid_price: BigDecimal,
    pub ask_price: BigDecimal,
    pub source_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The two currency legs of a loan: principal lent out, collateral pledged
#[derive(Debug, Serialize, Clone)]
pub struct CurrencyPair {
    pub principal: Currency,
    pub collateral: Currency,
}
