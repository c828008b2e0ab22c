//! Liquidation engine
//!
//! Estimates and initiates forced liquidation of a loan's collateral.
//! Estimation is a pure read; execution inserts the loan's single
//! liquidation order with a placeholder target amount that a downstream
//! valuation pipeline finalizes once market depth is known.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::currency::CurrencyService;
use crate::error::{EngineError, EngineResult};
use crate::ledger;
use crate::loan::model::{
    Initiator, LiquidationEstimate, LiquidationStatus, Loan, LoanLiquidation, LoanStatus,
};

/// Flat slippage assumption reported by estimates, integer percent
const ESTIMATE_SLIPPAGE_PERCENT: i32 = 2;

/// Market provider recorded until the valuation pipeline assigns one
const PLACEHOLDER_MARKET_PROVIDER: &str = "unassigned";

#[derive(Clone)]
pub struct LiquidationService {
    db_pool: PgPool,
    currencies: CurrencyService,
}

impl LiquidationService {
    pub fn new(db_pool: PgPool, currencies: CurrencyService) -> Self {
        Self { db_pool, currencies }
    }

    /// Estimate an early liquidation without placing an order
    ///
    /// Read-only, no transaction. Uses the most recent collateral bid rate
    /// at or before `as_of` (the latest rate when omitted). Valuation and
    /// LTV are computed in truncating scaled-integer arithmetic.
    pub async fn estimate_early_liquidation(
        &self,
        borrower_id: Uuid,
        loan_id: i64,
        as_of: Option<DateTime<Utc>>,
    ) -> EngineResult<LiquidationEstimate> {
        let loan = self.load_loan(borrower_id, loan_id).await?;
        ensure_liquidatable(&loan)?;

        // Collateral priced in principal-currency units
        let rate = self
            .currencies
            .latest_rate(loan.collateral_currency_id, loan.principal_currency_id, as_of)
            .await?;

        let current_valuation_amount =
            ledger::collateral_valuation(&loan.collateral_amount, &rate.bid_price)?;
        let current_ltv_ratio =
            ledger::ltv_percent(&loan.outstanding_amount, &current_valuation_amount)?;

        Ok(LiquidationEstimate {
            loan_id: loan.id,
            loan_status: loan.status,
            collateral_amount: loan.collateral_amount,
            outstanding_amount: loan.outstanding_amount,
            bid_price: rate.bid_price,
            rate_source_date: rate.source_date,
            current_valuation_amount,
            current_ltv_ratio,
            slippage_percent: ESTIMATE_SLIPPAGE_PERCENT,
            market_provider: PLACEHOLDER_MARKET_PROVIDER.to_string(),
            estimated_at: as_of.unwrap_or_else(Utc::now),
        })
    }

    /// Place the loan's single liquidation order
    ///
    /// Fails with a duplicate error if an order already exists. The
    /// existence check is an early exit only; the `UNIQUE (loan_id)`
    /// constraint is the authority under concurrent requests, and its
    /// violation surfaces as the same `AlreadyExists` error.
    pub async fn request_early_liquidation(
        &self,
        borrower_id: Uuid,
        loan_id: i64,
    ) -> EngineResult<LoanLiquidation> {
        let now = Utc::now();

        let pair_symbol = {
            let loan = self.load_loan(borrower_id, loan_id).await?;
            let pair = self
                .currencies
                .resolve_pair(loan.principal_currency_id, loan.collateral_currency_id)
                .await?;
            format!("{}/{}", pair.collateral.symbol, pair.principal.symbol)
        };

        let mut tx = self.db_pool.begin().await?;

        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE id = $1 AND borrower_id = $2 FOR UPDATE",
        )
        .bind(loan_id)
        .bind(borrower_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::NotFoundOrForbidden(format!("Loan {}", loan_id)))?;

        ensure_liquidatable(&loan)?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT loan_id FROM loan_liquidations WHERE loan_id = $1")
                .bind(loan_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(EngineError::AlreadyExists(format!(
                "Liquidation already requested for loan {}",
                loan_id
            )));
        }

        let order_ref = format!("{}-{}", loan_id, now.timestamp_millis());

        let liquidation = sqlx::query_as::<_, LoanLiquidation>(
            r#"
            INSERT INTO loan_liquidations (
                loan_id, initiator, liquidation_target_amount, market_provider,
                market_symbol, order_ref, status, order_date, acknowledged,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $9)
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(Initiator::Borrower)
        .bind(BigDecimal::from(0))
        .bind(PLACEHOLDER_MARKET_PROVIDER)
        .bind(&pair_symbol)
        .bind(&order_ref)
        .bind(LiquidationStatus::Requested)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(loan_id, order_ref = %order_ref, "Early liquidation requested");

        Ok(liquidation)
    }

    /// Finalize the liquidation target amount
    ///
    /// Narrow system update: touches only the target column, the status
    /// (`requested → finalized`) and `updated_at`. Idempotent; called once
    /// the downstream valuation pipeline has the authoritative figure.
    pub async fn update_liquidation_target_amount(
        &self,
        loan_id: i64,
        target_amount: BigDecimal,
    ) -> EngineResult<LoanLiquidation> {
        ledger::ensure_positive("liquidation_target_amount", &target_amount)?;

        let liquidation = sqlx::query_as::<_, LoanLiquidation>(
            r#"
            UPDATE loan_liquidations
            SET liquidation_target_amount = $1, status = $2, updated_at = $3
            WHERE loan_id = $4
            RETURNING *
            "#,
        )
        .bind(&target_amount)
        .bind(LiquidationStatus::Finalized)
        .bind(Utc::now())
        .bind(loan_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            EngineError::NotFound(format!("No liquidation requested for loan {}", loan_id))
        })?;

        tracing::info!(
            loan_id,
            target_amount = %liquidation.liquidation_target_amount,
            "Liquidation target amount finalized"
        );

        Ok(liquidation)
    }

    async fn load_loan(&self, borrower_id: Uuid, loan_id: i64) -> EngineResult<Loan> {
        let loan =
            sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 AND borrower_id = $2")
                .bind(loan_id)
                .bind(borrower_id)
                .fetch_optional(&self.db_pool)
                .await?
                .ok_or_else(|| EngineError::NotFoundOrForbidden(format!("Loan {}", loan_id)))?;

        Ok(loan)
    }
}

/// Liquidation applies to loans that are active or still originating
fn ensure_liquidatable(loan: &Loan) -> EngineResult<()> {
    if matches!(loan.status, LoanStatus::Active | LoanStatus::Originated) {
        Ok(())
    } else {
        Err(EngineError::InvalidLoanStatus {
            status: loan.status.as_str().to_string(),
            expected: "active or originated".to_string(),
        })
    }
}
