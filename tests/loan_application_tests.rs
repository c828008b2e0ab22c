//! Loan application lifecycle and repayment workflow tests
//!
//! Database-backed cases are ignored by default and expect a migrated
//! PostgreSQL instance reachable via TEST_DATABASE_URL.

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use bigdecimal::BigDecimal;
    use chrono::{Duration, Utc};
    use sqlx::PgPool;
    use uuid::Uuid;
    use validator::Validate;

    use vaultlend_engine::currency::CurrencyService;
    use vaultlend_engine::idgen::SequenceGenerator;
    use vaultlend_engine::loan::{
        CreateLoanApplicationRequest, InvoiceStatus, InvoiceType, LiquidationMode,
        ListLoanApplicationsQuery, LoanApplicationService, LoanApplicationStatus,
        LoanRepaymentService, LoanStatus, UpdateLoanApplicationRequest,
    };

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    /// Helper to create a test database pool with migrations applied
    async fn setup_test_db() -> PgPool {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/vaultlend_test".to_string());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        vaultlend_engine::db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        pool
    }

    /// Seed the principal/collateral currency pair, idempotently
    async fn seed_currencies(pool: &PgPool) -> (i64, i64) {
        let principal: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO currencies (
                blockchain_key, token_id, symbol, name, decimals,
                initial_ltv_ratio, margin_call_ltv_ratio, liquidation_ltv_ratio,
                min_amount, max_amount
            )
            VALUES ('ethereum', 'usdt', 'USDT', 'Tether USD', 18, 50, 70, 80, 1, $1)
            ON CONFLICT (blockchain_key, token_id)
                DO UPDATE SET symbol = EXCLUDED.symbol
            RETURNING id
            "#,
        )
        .bind(dec("1000000000000000000000000"))
        .fetch_one(pool)
        .await
        .expect("Failed to seed principal currency");

        let collateral: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO currencies (
                blockchain_key, token_id, symbol, name, decimals,
                initial_ltv_ratio, margin_call_ltv_ratio, liquidation_ltv_ratio,
                min_amount, max_amount
            )
            VALUES ('ethereum', 'eth', 'ETH', 'Ether', 18, 50, 70, 80, 1, $1)
            ON CONFLICT (blockchain_key, token_id)
                DO UPDATE SET symbol = EXCLUDED.symbol
            RETURNING id
            "#,
        )
        .bind(dec("1000000000000000000000000"))
        .fetch_one(pool)
        .await
        .expect("Failed to seed collateral currency");

        (principal.0, collateral.0)
    }

    async fn seed_platform_config(pool: &PgPool) {
        sqlx::query(
            r#"
            INSERT INTO platform_configs (
                interest_rate, provision_rate, liquidation_fee_rate,
                margin_call_ltv_ratio, effective_date
            )
            VALUES (12, 2, 1, 70, NOW() - INTERVAL '1 day')
            "#,
        )
        .execute(pool)
        .await
        .expect("Failed to seed platform config");
    }

    fn services(
        pool: &PgPool,
    ) -> (LoanApplicationService, LoanRepaymentService) {
        let id_gen = Arc::new(SequenceGenerator::new(1).expect("valid worker id"));
        let currencies = CurrencyService::new(pool.clone());
        (
            LoanApplicationService::new(pool.clone(), id_gen.clone(), currencies),
            LoanRepaymentService::new(pool.clone(), id_gen),
        )
    }

    fn create_request(
        borrower_id: Uuid,
        principal_currency_id: i64,
        collateral_currency_id: i64,
    ) -> CreateLoanApplicationRequest {
        CreateLoanApplicationRequest {
            borrower_id,
            principal_currency_id,
            principal_amount: dec("1000000000000000000000"),
            collateral_currency_id,
            collateral_amount: dec("1000000000000000000"),
            min_ltv_ratio: dec("30"),
            max_ltv_ratio: dec("50"),
            term_days: 90,
            liquidation_mode: LiquidationMode::Full,
            expired_date: Utc::now() + Duration::days(14),
            collateral_wallet_address: "0xabc0000000000000000000000000000000000001".to_string(),
            collateral_derivation_path: Some("m/44'/60'/0'/0/7".to_string()),
        }
    }

    #[tokio::test]
    async fn test_request_validation() {
        let mut request = create_request(Uuid::new_v4(), 1, 2);
        assert!(request.validate().is_ok());

        // Term out of range
        request.term_days = 0;
        assert!(request.validate().is_err());
        request.term_days = 90;

        // Wallet address too short
        request.collateral_wallet_address = "0x".to_string();
        assert!(request.validate().is_err());
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_create_application_with_collateral_invoice() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        let (applications, _) = services(&pool);

        let borrower_id = Uuid::new_v4();
        let (application, invoice) = applications
            .create_application(create_request(borrower_id, principal_id, collateral_id))
            .await
            .expect("Application creation should succeed");

        assert_eq!(application.status, LoanApplicationStatus::PendingCollateral);
        assert_eq!(invoice.loan_application_id, Some(application.id));
        assert_eq!(invoice.invoice_type, InvoiceType::CollateralDeposit);
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.invoiced_amount, application.collateral_amount);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_create_application_unknown_currency_pair() {
        let pool = setup_test_db().await;
        let (principal_id, _) = seed_currencies(&pool).await;
        let (applications, _) = services(&pool);

        let request = create_request(Uuid::new_v4(), principal_id, i64::MAX - 5);
        let err = applications
            .create_application(request)
            .await
            .expect_err("Missing collateral leg must fail the whole creation");

        assert_eq!(err.error_code(), "CURRENCY_PAIR_NOT_FOUND");
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_application_and_invoice_are_all_or_nothing() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;

        // Replay the creation unit of work by hand, forcing the second
        // statement to fail: the application insert must be rolled back.
        let application_id: i64 = 4_611_686_018_000_001_234;
        let now = Utc::now();

        let mut tx = pool.begin().await.expect("begin");
        sqlx::query(
            r#"
            INSERT INTO loan_applications (
                id, borrower_id, principal_currency_id, principal_amount,
                collateral_currency_id, collateral_amount, min_ltv_ratio,
                max_ltv_ratio, term_days, liquidation_mode, status,
                applied_date, expired_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 30, 50, 90, 'full',
                    'pending_collateral', $7, $8, $7, $7)
            "#,
        )
        .bind(application_id)
        .bind(Uuid::new_v4())
        .bind(principal_id)
        .bind(dec("1000000000000000000000"))
        .bind(collateral_id)
        .bind(dec("1000000000000000000"))
        .bind(now)
        .bind(now + Duration::days(14))
        .execute(&mut *tx)
        .await
        .expect("application insert succeeds inside the transaction");

        // Violates the invoiced_amount > 0 check
        let invoice_result = sqlx::query(
            r#"
            INSERT INTO invoices (
                id, user_id, loan_application_id, currency_id, invoiced_amount,
                invoice_type, status, invoice_date, due_date
            )
            VALUES ($1, $2, $3, $4, 0, 'collateral_deposit', 'pending', $5, $5)
            "#,
        )
        .bind(application_id + 1)
        .bind(Uuid::new_v4())
        .bind(application_id)
        .bind(collateral_id)
        .bind(now)
        .execute(&mut *tx)
        .await;
        assert!(invoice_result.is_err(), "invoice insert must fail");
        drop(tx); // rollback

        let remaining: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM loan_applications WHERE id = $1")
                .bind(application_id)
                .fetch_one(&pool)
                .await
                .expect("count");
        assert_eq!(remaining.0, 0, "no partial rows may survive the rollback");
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_cancel_matched_application_is_rejected() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        seed_platform_config(&pool).await;
        let (applications, _) = services(&pool);

        let borrower_id = Uuid::new_v4();
        let (application, _) = applications
            .create_application(create_request(borrower_id, principal_id, collateral_id))
            .await
            .expect("create");

        applications
            .publish_application(application.id)
            .await
            .expect("publish");
        applications
            .match_application(application.id)
            .await
            .expect("match");

        let err = applications
            .cancel_application(borrower_id, application.id, None)
            .await
            .expect_err("cancel after match must be rejected");

        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert!(err.to_string().contains("matched"));
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_modify_only_while_pending_collateral() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        let (applications, _) = services(&pool);

        let borrower_id = Uuid::new_v4();
        let (application, _) = applications
            .create_application(create_request(borrower_id, principal_id, collateral_id))
            .await
            .expect("create");

        let extended = applications
            .update_application(
                borrower_id,
                application.id,
                UpdateLoanApplicationRequest {
                    expired_date: Utc::now() + Duration::days(30),
                },
            )
            .await
            .expect("extending a pending application succeeds");
        assert!(extended.expired_date > application.expired_date);

        applications
            .publish_application(application.id)
            .await
            .expect("publish");

        let err = applications
            .update_application(
                borrower_id,
                application.id,
                UpdateLoanApplicationRequest {
                    expired_date: Utc::now() + Duration::days(60),
                },
            )
            .await
            .expect_err("modify after publish must be rejected");
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_cancel_closes_open_collateral_invoice() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        let (applications, _) = services(&pool);

        let borrower_id = Uuid::new_v4();
        let (application, invoice) = applications
            .create_application(create_request(borrower_id, principal_id, collateral_id))
            .await
            .expect("create");

        let cancelled = applications
            .cancel_application(borrower_id, application.id, Some("changed my mind".into()))
            .await
            .expect("cancel");
        assert_eq!(cancelled.status, LoanApplicationStatus::Cancelled);
        assert!(cancelled.closed_date.is_some());

        let status: (InvoiceStatus,) =
            sqlx::query_as("SELECT status FROM invoices WHERE id = $1")
                .bind(invoice.id)
                .fetch_one(&pool)
                .await
                .expect("invoice row");
        assert_eq!(status.0, InvoiceStatus::Cancelled);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_list_applications_pagination_and_filter() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        let (applications, _) = services(&pool);

        let borrower_id = Uuid::new_v4();
        for _ in 0..3 {
            applications
                .create_application(create_request(borrower_id, principal_id, collateral_id))
                .await
                .expect("create");
        }

        // Out-of-range page/limit are clamped before querying
        let listed = applications
            .list_applications(
                borrower_id,
                ListLoanApplicationsQuery {
                    status: None,
                    page: Some(0),
                    limit: Some(500),
                },
            )
            .await
            .expect("list");
        assert_eq!(listed.page, 1);
        assert_eq!(listed.limit, 100);
        assert_eq!(listed.total, 3);
        assert_eq!(listed.total_pages, 1);
        assert!(!listed.has_next);
        assert!(!listed.has_prev);

        let page_two = applications
            .list_applications(
                borrower_id,
                ListLoanApplicationsQuery {
                    status: Some(LoanApplicationStatus::PendingCollateral),
                    page: Some(2),
                    limit: Some(2),
                },
            )
            .await
            .expect("list page 2");
        assert_eq!(page_two.data.len(), 1);
        assert_eq!(page_two.total_pages, 2);
        assert!(page_two.has_prev);
        assert!(!page_two.has_next);

        // Other borrowers see nothing
        let other = applications
            .list_applications(Uuid::new_v4(), ListLoanApplicationsQuery::default())
            .await
            .expect("list other");
        assert_eq!(other.total, 0);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_repay_requires_active_loan() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        seed_platform_config(&pool).await;
        let (applications, repayments) = services(&pool);

        let borrower_id = Uuid::new_v4();
        let (application, _) = applications
            .create_application(create_request(borrower_id, principal_id, collateral_id))
            .await
            .expect("create");
        applications
            .publish_application(application.id)
            .await
            .expect("publish");
        let loan = applications
            .match_application(application.id)
            .await
            .expect("match");
        assert_eq!(loan.status, LoanStatus::Originated);

        // Originated, not yet active: repayment is rejected and no invoice
        // is created
        let err = repayments
            .request_repayment(borrower_id, loan.id)
            .await
            .expect_err("repaying an originated loan must fail");
        assert_eq!(err.error_code(), "INVALID_LOAN_STATUS");

        let invoices: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM invoices WHERE loan_id = $1",
        )
        .bind(loan.id)
        .fetch_one(&pool)
        .await
        .expect("count");
        assert_eq!(invoices.0, 0);

        // Ownership is indistinguishable from absence
        let err = repayments
            .request_repayment(Uuid::new_v4(), loan.id)
            .await
            .expect_err("foreign loan must not be repayable");
        assert_eq!(err.error_code(), "NOT_FOUND_OR_FORBIDDEN");
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_repeated_repayment_overwrites_repayment_row() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        seed_platform_config(&pool).await;
        let (applications, repayments) = services(&pool);

        let borrower_id = Uuid::new_v4();
        let (application, _) = applications
            .create_application(create_request(borrower_id, principal_id, collateral_id))
            .await
            .expect("create");
        applications
            .publish_application(application.id)
            .await
            .expect("publish");
        let loan = applications
            .match_application(application.id)
            .await
            .expect("match");
        applications.activate_loan(loan.id).await.expect("activate");

        let first = repayments
            .request_repayment(borrower_id, loan.id)
            .await
            .expect("first repayment request");
        let second = repayments
            .request_repayment(borrower_id, loan.id)
            .await
            .expect("re-request before paying is allowed");
        assert_ne!(first.id, second.id);

        // Exactly one row, pointing at the latest invoice; the first
        // invoice is superseded, not kept open
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*) OVER (), repayment_invoice_id FROM loan_repayments WHERE loan_id = $1",
        )
        .bind(loan.id)
        .fetch_one(&pool)
        .await
        .expect("repayment row");
        assert_eq!(row.0, 1);
        assert_eq!(row.1, second.id);

        let first_status: (InvoiceStatus,) =
            sqlx::query_as("SELECT status FROM invoices WHERE id = $1")
                .bind(first.id)
                .fetch_one(&pool)
                .await
                .expect("first invoice");
        assert_eq!(first_status.0, InvoiceStatus::Cancelled);
    }

    #[tokio::test]
    #[ignore] // Requires database setup
    async fn test_early_repayment_breakdown_and_window() {
        let pool = setup_test_db().await;
        let (principal_id, collateral_id) = seed_currencies(&pool).await;
        seed_platform_config(&pool).await;
        let (applications, repayments) = services(&pool);

        let borrower_id = Uuid::new_v4();
        let (application, _) = applications
            .create_application(create_request(borrower_id, principal_id, collateral_id))
            .await
            .expect("create");
        applications
            .publish_application(application.id)
            .await
            .expect("publish");
        let loan = applications
            .match_application(application.id)
            .await
            .expect("match");
        applications.activate_loan(loan.id).await.expect("activate");

        let response = repayments
            .request_early_repayment(borrower_id, loan.id)
            .await
            .expect("early repayment request");

        assert_eq!(response.invoice.invoice_type, InvoiceType::EarlyRepayment);
        let window = response.invoice.due_date - response.invoice.invoice_date;
        assert_eq!(window.num_days(), 3);

        assert_eq!(response.breakdown.principal_amount, loan.principal_amount);
        assert_eq!(response.breakdown.interest_amount, loan.interest_amount);
        assert_eq!(response.breakdown.premium_amount, loan.premium_amount);
        assert!(response.breakdown.remaining_term_days.is_none());

        // The loan's repayment amount was fixed at origination
        let expected_repayment = &loan.principal_amount
            + &loan.interest_amount
            + &loan.premium_amount
            + &loan.liquidation_fee_amount;
        assert_eq!(loan.repayment_amount, expected_repayment);
    }
}
