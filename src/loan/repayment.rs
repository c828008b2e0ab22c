//! Loan repayment workflow
//!
//! Issues repayment invoices (normal and early) against an active loan and
//! maintains the single `loan_repayments` row per loan. Re-requests before
//! payment are intentional: the previous open invoice is cancelled and the
//! upsert overwrites the row, so only the latest invoice reference survives.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::idgen::SequenceGenerator;
use crate::loan::model::{
    EarlyRepaymentResponse, Initiator, Invoice, InvoiceStatus, InvoiceType, Loan, LoanAmounts,
    LoanStatus, RepaymentBreakdown,
};

/// Due window for a scheduled repayment invoice
const REPAYMENT_INVOICE_DUE_DAYS: i64 = 7;

/// Due window for an early-repayment invoice
const EARLY_REPAYMENT_INVOICE_DUE_DAYS: i64 = 3;

#[derive(Clone)]
pub struct LoanRepaymentService {
    db_pool: PgPool,
    id_gen: Arc<SequenceGenerator>,
}

impl LoanRepaymentService {
    pub fn new(db_pool: PgPool, id_gen: Arc<SequenceGenerator>) -> Self {
        Self { db_pool, id_gen }
    }

    /// Request a scheduled repayment of an active loan
    pub async fn request_repayment(
        &self,
        borrower_id: Uuid,
        loan_id: i64,
    ) -> EngineResult<Invoice> {
        let loan = self.load_active_loan(borrower_id, loan_id).await?;

        let invoice = self
            .issue_repayment_invoice(&loan, InvoiceType::Repayment, REPAYMENT_INVOICE_DUE_DAYS)
            .await?;

        tracing::info!(loan_id, invoice_id = invoice.id, "Repayment requested");

        Ok(invoice)
    }

    /// Request early repayment of an active loan
    ///
    /// Returns the invoice plus a breakdown projection of what settling now
    /// covers. Store-level failures on this path are wrapped with repayment
    /// context; the original error stays attached as the cause.
    pub async fn request_early_repayment(
        &self,
        borrower_id: Uuid,
        loan_id: i64,
    ) -> EngineResult<EarlyRepaymentResponse> {
        let loan = self.load_active_loan(borrower_id, loan_id).await?;

        let invoice = self
            .issue_repayment_invoice(
                &loan,
                InvoiceType::EarlyRepayment,
                EARLY_REPAYMENT_INVOICE_DUE_DAYS,
            )
            .await
            .map_err(|e| {
                EngineError::repayment_context(
                    format!("Early repayment request for loan {} failed", loan_id),
                    e,
                )
            })?;

        // Remaining-term figure is computed downstream by the settlement
        // layer; the projection carries a placeholder until then.
        let breakdown = RepaymentBreakdown {
            principal_amount: loan.principal_amount.clone(),
            interest_amount: loan.interest_amount.clone(),
            premium_amount: loan.premium_amount.clone(),
            remaining_term_days: None,
        };

        tracing::info!(loan_id, invoice_id = invoice.id, "Early repayment requested");

        Ok(EarlyRepaymentResponse { invoice, breakdown })
    }

    /// Financial fields of one of the borrower's loans
    pub async fn loan_amounts(&self, borrower_id: Uuid, loan_id: i64) -> EngineResult<LoanAmounts> {
        let loan = self.load_loan(borrower_id, loan_id).await?;

        Ok(LoanAmounts {
            loan_id: loan.id,
            status: loan.status,
            principal_currency_id: loan.principal_currency_id,
            collateral_currency_id: loan.collateral_currency_id,
            principal_amount: loan.principal_amount,
            interest_amount: loan.interest_amount,
            premium_amount: loan.premium_amount,
            liquidation_fee_amount: loan.liquidation_fee_amount,
            repayment_amount: loan.repayment_amount,
            outstanding_amount: loan.outstanding_amount,
            collateral_amount: loan.collateral_amount,
        })
    }

    /// Load a loan scoped to its borrower
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

    async fn load_active_loan(&self, borrower_id: Uuid, loan_id: i64) -> EngineResult<Loan> {
        let loan = self.load_loan(borrower_id, loan_id).await?;

        if loan.status != LoanStatus::Active {
            return Err(EngineError::InvalidLoanStatus {
                status: loan.status.as_str().to_string(),
                expected: LoanStatus::Active.as_str().to_string(),
            });
        }

        Ok(loan)
    }

    /// Create the repayment invoice and overwrite the loan's repayment row
    ///
    /// One transaction: the previous open invoice of the same type is
    /// cancelled, the new invoice inserted, and the `loan_repayments` row
    /// upserted keyed by loan id. Old row fields are fully superseded.
    async fn issue_repayment_invoice(
        &self,
        loan: &Loan,
        invoice_type: InvoiceType,
        due_days: i64,
    ) -> EngineResult<Invoice> {
        let now = Utc::now();
        let due_date = now + Duration::days(due_days);
        let invoice_id = self.id_gen.next_id();

        let mut tx = self.db_pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET status = $1, updated_at = $2
            WHERE loan_id = $3
              AND invoice_type = $4
              AND status IN ('pending', 'partially_paid')
            "#,
        )
        .bind(InvoiceStatus::Cancelled)
        .bind(now)
        .bind(loan.id)
        .bind(invoice_type)
        .execute(&mut *tx)
        .await?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                id, user_id, loan_id, currency_id, invoiced_amount,
                prepaid_amount, paid_amount, invoice_type, status,
                invoice_date, due_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(loan.borrower_id)
        .bind(loan.id)
        .bind(loan.principal_currency_id)
        .bind(&loan.outstanding_amount)
        .bind(BigDecimal::from(0))
        .bind(BigDecimal::from(0))
        .bind(invoice_type)
        .bind(InvoiceStatus::Pending)
        .bind(now)
        .bind(due_date)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO loan_repayments (
                loan_id, initiator, repayment_invoice_id,
                repayment_invoice_date, acknowledged, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, FALSE, $5, $5)
            ON CONFLICT (loan_id) DO UPDATE SET
                initiator = EXCLUDED.initiator,
                repayment_invoice_id = EXCLUDED.repayment_invoice_id,
                repayment_invoice_date = EXCLUDED.repayment_invoice_date,
                acknowledged = EXCLUDED.acknowledged,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(loan.id)
        .bind(Initiator::Borrower)
        .bind(invoice_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(invoice)
    }
}
