//! Centralized error handling for the VaultLend engine
//!
//! This module provides the single error type surfaced by every engine
//! operation, with a stable machine-readable code per variant. Transport
//! layers map these codes onto whatever wire shape they use.

use thiserror::Error;

/// Engine error type with stable error codes
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Ownership mismatches are reported identically to a missing record so
    /// callers cannot probe for the existence of other users' records.
    #[error("Not found or not permitted: {0}")]
    NotFoundOrForbidden(String),

    #[error("Cannot {action} a loan application in status {status}")]
    InvalidTransition { status: String, action: &'static str },

    #[error("Loan is in status {status}, expected {expected}")]
    InvalidLoanStatus { status: String, expected: String },

    #[error("Currency pair not found: {0}")]
    CurrencyPairNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Early-repayment wrapper: carries the original failure as `source`.
    #[error("Repayment request failed: {message}")]
    Repayment {
        message: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Get the stable error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::NotFoundOrForbidden(_) => "NOT_FOUND_OR_FORBIDDEN",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::InvalidLoanStatus { .. } => "INVALID_LOAN_STATUS",
            EngineError::CurrencyPairNotFound(_) => "CURRENCY_PAIR_NOT_FOUND",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::Validation(_) => "VALIDATION_FAILURE",
            EngineError::Repayment { .. } => "REPAYMENT_FAILED",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Wrap an error in the early-repayment context, preserving the cause
    pub fn repayment_context(message: impl Into<String>, source: EngineError) -> Self {
        EngineError::Repayment {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

// Convenience conversions from common error types

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                // The unique constraint is the authoritative duplicate
                // signal; application-level pre-checks are an early exit only.
                EngineError::AlreadyExists(db_err.to_string())
            }
            _ => EngineError::Database(err.to_string()),
        }
    }
}

impl From<crate::config::ConfigError> for EngineError {
    fn from(err: crate::config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;
