//! VaultLend Lending Engine
//!
//! Library crate implementing the loan lifecycle and liquidation core of the
//! VaultLend crypto-collateralized lending platform: the loan-application
//! state machine, repayment and liquidation workflows, currency and
//! exchange-rate resolution, scaled-integer ledger arithmetic, and the
//! distributed identifier generator. The transport layer, authentication,
//! price-feed ingestion and settlement watching live outside this crate and
//! call in through the service types exported here.

pub mod cache;
pub mod config;
pub mod currency;
pub mod db;
pub mod error;
pub mod idgen;
pub mod ledger;
pub mod loan;
pub mod policy;

/// Initialize structured logging for an embedding binary
///
/// Honors `RUST_LOG` when set, falling back to the given default filter.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .init();
}
