//! Loan lifecycle models for the VaultLend engine
//!
//! Financial records carry engine-generated 63-bit integer ids; borrower
//! identities stay `Uuid`s issued by the user service. Rows are never
//! deleted; a lifecycle ends by status transition.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::{EngineError, EngineResult};

/// Loan application status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_application_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanApplicationStatus {
    PendingCollateral,
    Published,
    Matched,
    Cancelled,
    Closed,
    Expired,
}

impl LoanApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanApplicationStatus::PendingCollateral => "pending_collateral",
            LoanApplicationStatus::Published => "published",
            LoanApplicationStatus::Matched => "matched",
            LoanApplicationStatus::Cancelled => "cancelled",
            LoanApplicationStatus::Closed => "closed",
            LoanApplicationStatus::Expired => "expired",
        }
    }

    /// Whether the given action is legal from this status
    pub fn allows(&self, action: ApplicationAction) -> bool {
        matches!(
            (*self, action),
            (
                LoanApplicationStatus::PendingCollateral,
                ApplicationAction::Modify
                    | ApplicationAction::Cancel
                    | ApplicationAction::Publish
            ) | (
                LoanApplicationStatus::Published,
                ApplicationAction::Cancel | ApplicationAction::Match
            )
        )
    }
}

/// Actions the application state machine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationAction {
    Modify,
    Cancel,
    Publish,
    Match,
}

impl ApplicationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationAction::Modify => "modify",
            ApplicationAction::Cancel => "cancel",
            ApplicationAction::Publish => "publish",
            ApplicationAction::Match => "match",
        }
    }
}

/// Fail with `InvalidTransition` unless `action` is legal from `status`
pub fn ensure_transition(
    status: LoanApplicationStatus,
    action: ApplicationAction,
) -> EngineResult<()> {
    if status.allows(action) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            status: status.as_str().to_string(),
            action: action.as_str(),
        })
    }
}

/// Loan status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "loan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Originated,
    Active,
    Repaid,
    Liquidated,
    Closed,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Originated => "originated",
            LoanStatus::Active => "active",
            LoanStatus::Repaid => "repaid",
            LoanStatus::Liquidated => "liquidated",
            LoanStatus::Closed => "closed",
        }
    }
}

/// How collateral is sold off when the loan is distressed
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "liquidation_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LiquidationMode {
    Full,
    Partial,
}

/// Invoice type
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "invoice_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    CollateralDeposit,
    Repayment,
    EarlyRepayment,
}

/// Invoice status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Overdue,
    Expired,
    Cancelled,
}

/// Which party initiated a repayment or liquidation cycle
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "initiator_party", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    Borrower,
    Lender,
    System,
}

/// Liquidation order status: placeholder target first, finalized later
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "liquidation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LiquidationStatus {
    Requested,
    Finalized,
}

/// A borrower's funding request
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct LoanApplication {
    pub id: i64,
    pub borrower_id: Uuid,
    pub principal_currency_id: i64,
    pub principal_amount: BigDecimal,
    pub collateral_currency_id: i64,
    pub collateral_amount: BigDecimal,
    pub min_ltv_ratio: BigDecimal,
    pub max_ltv_ratio: BigDecimal,
    pub term_days: i32,
    pub liquidation_mode: LiquidationMode,
    pub status: LoanApplicationStatus,
    pub applied_date: DateTime<Utc>,
    pub expired_date: DateTime<Utc>,
    pub closed_date: Option<DateTime<Utc>>,
    pub closed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A funded loan
///
/// `repayment_amount` is fixed at origination as
/// `principal + interest + premium + liquidation_fee`; it is never re-derived
/// at read time.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Loan {
    pub id: i64,
    pub loan_application_id: i64,
    pub borrower_id: Uuid,
    pub principal_currency_id: i64,
    pub collateral_currency_id: i64,
    pub principal_amount: BigDecimal,
    pub interest_amount: BigDecimal,
    pub premium_amount: BigDecimal,
    pub liquidation_fee_amount: BigDecimal,
    pub repayment_amount: BigDecimal,
    pub collateral_amount: BigDecimal,
    /// Remaining amount owed; maintained by the settlement layer
    pub outstanding_amount: BigDecimal,
    /// LTV percentage at which a margin call is issued, frozen at origination
    pub mc_ltv_ratio: BigDecimal,
    pub origination_date: DateTime<Utc>,
    pub maturity_date: DateTime<Utc>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payable request tied to a loan or application
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Invoice {
    pub id: i64,
    pub user_id: Uuid,
    pub loan_application_id: Option<i64>,
    pub loan_id: Option<i64>,
    pub currency_id: i64,
    pub invoiced_amount: BigDecimal,
    pub prepaid_amount: BigDecimal,
    pub paid_amount: BigDecimal,
    pub wallet_address: Option<String>,
    pub derivation_path: Option<String>,
    pub invoice_type: InvoiceType,
    pub status: InvoiceStatus,
    pub invoice_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub expired_date: Option<DateTime<Utc>>,
    pub paid_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single repayment-cycle row per loan (upsert-overwrite semantics)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct LoanRepayment {
    pub loan_id: i64,
    pub initiator: Initiator,
    pub repayment_invoice_id: i64,
    pub repayment_invoice_date: DateTime<Utc>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The single liquidation order per loan
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct LoanLiquidation {
    pub loan_id: i64,
    pub initiator: Initiator,
    /// Zero placeholder at request time, finalized by the valuation pipeline
    pub liquidation_target_amount: BigDecimal,
    pub market_provider: String,
    pub market_symbol: String,
    pub order_ref: String,
    pub status: LiquidationStatus,
    pub order_date: DateTime<Utc>,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Request / response objects
// ============================================================================

/// Request to create a loan application
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLoanApplicationRequest {
    pub borrower_id: Uuid,
    pub principal_currency_id: i64,
    pub principal_amount: BigDecimal,
    pub collateral_currency_id: i64,
    pub collateral_amount: BigDecimal,
    pub min_ltv_ratio: BigDecimal,
    pub max_ltv_ratio: BigDecimal,
    #[validate(range(min = 1, max = 3650))]
    pub term_days: i32,
    pub liquidation_mode: LiquidationMode,
    pub expired_date: DateTime<Utc>,
    /// Deposit address derived by the wallet service, passed through as-is
    #[validate(length(min = 8, max = 128))]
    pub collateral_wallet_address: String,
    pub collateral_derivation_path: Option<String>,
}

/// Request to modify a pending application (extend its expiry)
#[derive(Debug, Deserialize)]
pub struct UpdateLoanApplicationRequest {
    pub expired_date: DateTime<Utc>,
}

/// Query for listing a borrower's applications
#[derive(Debug, Deserialize, Default)]
pub struct ListLoanApplicationsQuery {
    pub status: Option<LoanApplicationStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Early-repayment projection: what settling now would cost
///
/// `remaining_term_days` is a placeholder until the settlement layer
/// computes the authoritative figure.
#[derive(Debug, Serialize, Clone)]
pub struct RepaymentBreakdown {
    pub principal_amount: BigDecimal,
    pub interest_amount: BigDecimal,
    pub premium_amount: BigDecimal,
    pub remaining_term_days: Option<i32>,
}

/// Result of an early-repayment request
#[derive(Debug, Serialize, Clone)]
pub struct EarlyRepaymentResponse {
    pub invoice: Invoice,
    pub breakdown: RepaymentBreakdown,
}

/// Read-only early-liquidation estimate; places no order
#[derive(Debug, Serialize, Clone)]
pub struct LiquidationEstimate {
    pub loan_id: i64,
    pub loan_status: LoanStatus,
    pub collateral_amount: BigDecimal,
    pub outstanding_amount: BigDecimal,
    pub bid_price: BigDecimal,
    pub rate_source_date: DateTime<Utc>,
    pub current_valuation_amount: BigDecimal,
    pub current_ltv_ratio: BigDecimal,
    /// Flat slippage assumption, integer percent
    pub slippage_percent: i32,
    pub market_provider: String,
    pub estimated_at: DateTime<Utc>,
}

/// Financial fields of a loan, for the amounts read operation
#[derive(Debug, Serialize, Clone)]
pub struct LoanAmounts {
    pub loan_id: i64,
    pub status: LoanStatus,
    pub principal_currency_id: i64,
    pub collateral_currency_id: i64,
    pub principal_amount: BigDecimal,
    pub interest_amount: BigDecimal,
    pub premium_amount: BigDecimal,
    pub liquidation_fee_amount: BigDecimal,
    pub repayment_amount: BigDecimal,
    pub outstanding_amount: BigDecimal,
    pub collateral_amount: BigDecimal,
}

// ============================================================================
// Pagination
// ============================================================================

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Clamp a requested page to >= 1
pub fn clamp_page(page: Option<i64>) -> i64 {
    let requested = page.unwrap_or(1);
    let clamped = requested.max(1);
    if clamped != requested {
        tracing::warn!(requested, clamped, "page out of range, clamped");
    }
    clamped
}

/// Clamp a requested limit into 1..=MAX_PAGE_LIMIT
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    let requested = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let clamped = requested.clamp(1, MAX_PAGE_LIMIT);
    if clamped != requested {
        tracing::warn!(requested, clamped, "limit out of range, clamped");
    }
    clamped
}

/// Paginated response with navigation metadata
///
/// Metadata is derived from the clamped page and limit actually used for the
/// query, not the raw request values.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self {
            data,
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1 && total_pages > 0,
        }
    }
}
