//! Loan application state machine
//!
//! Governs `pending_collateral → published → matched` and the terminal
//! statuses, creating the paired collateral-deposit invoice alongside the
//! application and originating the loan when an application is matched.
//! Every multi-row mutation runs in one transaction: all rows land or none
//! do.

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::currency::CurrencyService;
use crate::error::{EngineError, EngineResult};
use crate::idgen::SequenceGenerator;
use crate::ledger;
use crate::loan::model::{
    clamp_limit, clamp_page, ensure_transition, ApplicationAction, CreateLoanApplicationRequest,
    Invoice, InvoiceStatus, InvoiceType, ListLoanApplicationsQuery, Loan, LoanApplication,
    LoanApplicationStatus, LoanStatus, PaginatedResponse, UpdateLoanApplicationRequest,
};
use crate::policy;

/// Days in the interest year used for term proration
const INTEREST_YEAR_DAYS: i64 = 365;

#[derive(Clone)]
pub struct LoanApplicationService {
    db_pool: PgPool,
    id_gen: Arc<SequenceGenerator>,
    currencies: CurrencyService,
}

impl LoanApplicationService {
    pub fn new(db_pool: PgPool, id_gen: Arc<SequenceGenerator>, currencies: CurrencyService) -> Self {
        Self {
            db_pool,
            id_gen,
            currencies,
        }
    }

    /// Create an application and its collateral-deposit invoice atomically
    pub async fn create_application(
        &self,
        request: CreateLoanApplicationRequest,
    ) -> EngineResult<(LoanApplication, Invoice)> {
        request.validate()?;
        ledger::ensure_positive("principal_amount", &request.principal_amount)?;
        ledger::ensure_positive("collateral_amount", &request.collateral_amount)?;

        let now = Utc::now();
        if request.expired_date < now {
            return Err(EngineError::Validation(
                "expired_date must not be in the past".to_string(),
            ));
        }

        // Both currency legs must exist before anything is written
        let pair = self
            .currencies
            .resolve_pair(request.principal_currency_id, request.collateral_currency_id)
            .await?;

        // Ids are assigned up front so the invoice can reference the
        // application inside the same transaction
        let application_id = self.id_gen.next_id();
        let invoice_id = self.id_gen.next_id();

        let mut tx = self.db_pool.begin().await?;

        let application = sqlx::query_as::<_, LoanApplication>(
            r#"
            INSERT INTO loan_applications (
                id, borrower_id, principal_currency_id, principal_amount,
                collateral_currency_id, collateral_amount, min_ltv_ratio,
                max_ltv_ratio, term_days, liquidation_mode, status,
                applied_date, expired_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(application_id)
        .bind(request.borrower_id)
        .bind(pair.principal.id)
        .bind(&request.principal_amount)
        .bind(pair.collateral.id)
        .bind(&request.collateral_amount)
        .bind(&request.min_ltv_ratio)
        .bind(&request.max_ltv_ratio)
        .bind(request.term_days)
        .bind(request.liquidation_mode)
        .bind(LoanApplicationStatus::PendingCollateral)
        .bind(now)
        .bind(request.expired_date)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        // An unpaid deposit expires with the application, so the invoice due
        // date is the application's own expiry
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                id, user_id, loan_application_id, currency_id, invoiced_amount,
                prepaid_amount, paid_amount, wallet_address, derivation_path,
                invoice_type, status, invoice_date, due_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(invoice_id)
        .bind(request.borrower_id)
        .bind(application_id)
        .bind(pair.collateral.id)
        .bind(&request.collateral_amount)
        .bind(BigDecimal::from(0))
        .bind(BigDecimal::from(0))
        .bind(&request.collateral_wallet_address)
        .bind(&request.collateral_derivation_path)
        .bind(InvoiceType::CollateralDeposit)
        .bind(InvoiceStatus::Pending)
        .bind(now)
        .bind(request.expired_date)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            application_id,
            invoice_id,
            borrower_id = %request.borrower_id,
            "Loan application created"
        );

        Ok((application, invoice))
    }

    /// Get one of the borrower's applications
    pub async fn get_application(
        &self,
        borrower_id: Uuid,
        application_id: i64,
    ) -> EngineResult<LoanApplication> {
        let application = sqlx::query_as::<_, LoanApplication>(
            "SELECT * FROM loan_applications WHERE id = $1 AND borrower_id = $2",
        )
        .bind(application_id)
        .bind(borrower_id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            EngineError::NotFoundOrForbidden(format!("Loan application {}", application_id))
        })?;

        Ok(application)
    }

    /// Extend a pending application's expiry
    pub async fn update_application(
        &self,
        borrower_id: Uuid,
        application_id: i64,
        request: UpdateLoanApplicationRequest,
    ) -> EngineResult<LoanApplication> {
        let application = self.get_application(borrower_id, application_id).await?;
        ensure_transition(application.status, ApplicationAction::Modify)?;

        if request.expired_date < application.applied_date {
            return Err(EngineError::Validation(
                "expired_date must not precede applied_date".to_string(),
            ));
        }

        // Status-guarded update: a concurrent transition between the check
        // above and this statement leaves zero rows, never a stale write
        let updated = sqlx::query_as::<_, LoanApplication>(
            r#"
            UPDATE loan_applications
            SET expired_date = $1, updated_at = $2
            WHERE id = $3 AND status = $4
            RETURNING *
            "#,
        )
        .bind(request.expired_date)
        .bind(Utc::now())
        .bind(application_id)
        .bind(LoanApplicationStatus::PendingCollateral)
        .fetch_optional(&self.db_pool)
        .await?;

        match updated {
            Some(application) => Ok(application),
            None => {
                let current = self.get_application(borrower_id, application_id).await?;
                ensure_transition(current.status, ApplicationAction::Modify)?;
                // The guard only fails on a status change, so this is
                // unreachable once the transition check has re-run
                Err(EngineError::InvalidTransition {
                    status: current.status.as_str().to_string(),
                    action: ApplicationAction::Modify.as_str(),
                })
            }
        }
    }

    /// Cancel an application and its open collateral invoice
    pub async fn cancel_application(
        &self,
        borrower_id: Uuid,
        application_id: i64,
        reason: Option<String>,
    ) -> EngineResult<LoanApplication> {
        let now = Utc::now();
        let mut tx = self.db_pool.begin().await?;

        let application = sqlx::query_as::<_, LoanApplication>(
            "SELECT * FROM loan_applications WHERE id = $1 AND borrower_id = $2 FOR UPDATE",
        )
        .bind(application_id)
        .bind(borrower_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            EngineError::NotFoundOrForbidden(format!("Loan application {}", application_id))
        })?;

        ensure_transition(application.status, ApplicationAction::Cancel)?;

        let application = sqlx::query_as::<_, LoanApplication>(
            r#"
            UPDATE loan_applications
            SET status = $1, closed_date = $2, closed_reason = $3, updated_at = $2
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(LoanApplicationStatus::Cancelled)
        .bind(now)
        .bind(reason.as_deref().unwrap_or("cancelled by borrower"))
        .bind(application_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET status = $1, updated_at = $2
            WHERE loan_application_id = $3
              AND invoice_type = $4
              AND status IN ('pending', 'partially_paid')
            "#,
        )
        .bind(InvoiceStatus::Cancelled)
        .bind(now)
        .bind(application_id)
        .bind(InvoiceType::CollateralDeposit)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(application_id, "Loan application cancelled");

        Ok(application)
    }

    /// Mark an application published once its collateral deposit is confirmed
    ///
    /// System-facing: called by the settlement layer, not by borrowers.
    pub async fn publish_application(&self, application_id: i64) -> EngineResult<LoanApplication> {
        let now = Utc::now();
        let mut tx = self.db_pool.begin().await?;

        let application = sqlx::query_as::<_, LoanApplication>(
            "SELECT * FROM loan_applications WHERE id = $1 FOR UPDATE",
        )
        .bind(application_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("Loan application {}", application_id)))?;

        ensure_transition(application.status, ApplicationAction::Publish)?;

        let application = sqlx::query_as::<_, LoanApplication>(
            r#"
            UPDATE loan_applications
            SET status = $1, updated_at = $2
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(LoanApplicationStatus::Published)
        .bind(now)
        .bind(application_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE invoices
            SET status = $1, paid_amount = invoiced_amount, paid_date = $2, updated_at = $2
            WHERE loan_application_id = $3
              AND invoice_type = $4
              AND status IN ('pending', 'partially_paid')
            "#,
        )
        .bind(InvoiceStatus::Paid)
        .bind(now)
        .bind(application_id)
        .bind(InvoiceType::CollateralDeposit)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(application_id, "Loan application published");

        Ok(application)
    }

    /// Match a published application and originate its loan
    ///
    /// System-facing. The loan's repayment amount is fixed here as
    /// `principal + interest + premium + liquidation fee`; readers never
    /// re-derive it.
    pub async fn match_application(&self, application_id: i64) -> EngineResult<Loan> {
        let now = Utc::now();
        let config = policy::latest_platform_config(&self.db_pool, Some(now)).await?;
        let loan_id = self.id_gen.next_id();

        let mut tx = self.db_pool.begin().await?;

        let application = sqlx::query_as::<_, LoanApplication>(
            "SELECT * FROM loan_applications WHERE id = $1 FOR UPDATE",
        )
        .bind(application_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("Loan application {}", application_id)))?;

        ensure_transition(application.status, ApplicationAction::Match)?;

        // Term-prorated interest plus flat provision and liquidation-fee
        // portions, all in scaled-integer arithmetic
        let annual_interest =
            ledger::rate_portion(&application.principal_amount, &config.interest_rate)?;
        let interest = ledger::mul_div(
            &annual_interest,
            &BigDecimal::from(i64::from(application.term_days)),
            &BigDecimal::from(INTEREST_YEAR_DAYS),
        )?;
        let premium = ledger::rate_portion(&application.principal_amount, &config.provision_rate)?;
        let liquidation_fee =
            ledger::rate_portion(&application.principal_amount, &config.liquidation_fee_rate)?;
        let repayment_amount =
            &application.principal_amount + &interest + &premium + &liquidation_fee;

        let maturity_date = now + Duration::days(i64::from(application.term_days));

        let loan = sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (
                id, loan_application_id, borrower_id, principal_currency_id,
                collateral_currency_id, principal_amount, interest_amount,
                premium_amount, liquidation_fee_amount, repayment_amount,
                collateral_amount, outstanding_amount, mc_ltv_ratio,
                origination_date, maturity_date, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18)
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(application_id)
        .bind(application.borrower_id)
        .bind(application.principal_currency_id)
        .bind(application.collateral_currency_id)
        .bind(&application.principal_amount)
        .bind(&interest)
        .bind(&premium)
        .bind(&liquidation_fee)
        .bind(&repayment_amount)
        .bind(&application.collateral_amount)
        .bind(&repayment_amount)
        .bind(&config.margin_call_ltv_ratio)
        .bind(now)
        .bind(maturity_date)
        .bind(LoanStatus::Originated)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE loan_applications SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(LoanApplicationStatus::Matched)
            .bind(now)
            .bind(application_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(application_id, loan_id, "Loan application matched, loan originated");

        Ok(loan)
    }

    /// Activate an originated loan once principal disbursement is confirmed
    ///
    /// System-facing: called by the settlement layer.
    pub async fn activate_loan(&self, loan_id: i64) -> EngineResult<Loan> {
        let mut tx = self.db_pool.begin().await?;

        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(loan_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Loan {}", loan_id)))?;

        if loan.status != LoanStatus::Originated {
            return Err(EngineError::InvalidLoanStatus {
                status: loan.status.as_str().to_string(),
                expected: LoanStatus::Originated.as_str().to_string(),
            });
        }

        let loan = sqlx::query_as::<_, Loan>(
            "UPDATE loans SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(LoanStatus::Active)
        .bind(Utc::now())
        .bind(loan_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(loan_id, "Loan activated");

        Ok(loan)
    }

    /// List a borrower's applications with status filter and pagination
    ///
    /// Page and limit are clamped before querying; metadata is derived from
    /// the clamped values.
    pub async fn list_applications(
        &self,
        borrower_id: Uuid,
        query: ListLoanApplicationsQuery,
    ) -> EngineResult<PaginatedResponse<LoanApplication>> {
        let page = clamp_page(query.page);
        let limit = clamp_limit(query.limit);
        let offset = (page - 1) * limit;

        let mut data_builder =
            sqlx::QueryBuilder::new("SELECT * FROM loan_applications WHERE borrower_id = ");
        data_builder.push_bind(borrower_id);
        let mut count_builder =
            sqlx::QueryBuilder::new("SELECT COUNT(*) FROM loan_applications WHERE borrower_id = ");
        count_builder.push_bind(borrower_id);

        if let Some(status) = query.status {
            data_builder.push(" AND status = ");
            data_builder.push_bind(status);
            count_builder.push(" AND status = ");
            count_builder.push_bind(status);
        }

        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.db_pool)
            .await?;

        data_builder.push(" ORDER BY applied_date DESC, id DESC LIMIT ");
        data_builder.push_bind(limit);
        data_builder.push(" OFFSET ");
        data_builder.push_bind(offset);

        let applications = data_builder
            .build_query_as::<LoanApplication>()
            .fetch_all(&self.db_pool)
            .await?;

        Ok(PaginatedResponse::new(applications, total, page, limit))
    }
}
