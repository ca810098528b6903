//! Database service for lending-service.

use crate::models::{
    AssetBalance, FundRecord, Grant, Holding, Loan, OriginationConfig, RateBucket, ShareBalance,
    StateSnapshot,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::LendingStore;
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "lending-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    async fn load_all(&self) -> Result<StateSnapshot, AppError> {
        let origination = sqlx::query_as::<_, OriginationConfig>(
            r#"
            SELECT next_loan_id, min_principal, max_principal, min_duration_secs, max_duration_secs
            FROM origination_config
            WHERE config_id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load origination config"))?;

        let grants = sqlx::query_as::<_, Grant>(
            "SELECT module, grantee, active FROM module_grants ORDER BY module, grantee",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load grants"))?;

        let buckets = sqlx::query_as::<_, RateBucket>(
            r#"
            SELECT bucket_id, rate_per_second, chi, last_drip_utc, created_utc
            FROM rate_buckets
            ORDER BY bucket_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load rate buckets"))?;

        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT loan_id, borrower, principal, duration_secs, bucket_id, status, chi_at_draw,
                   created_utc, funded_utc, funded_by, repaid_amount, closed_utc
            FROM loans
            ORDER BY loan_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load loans"))?;

        let funds = sqlx::query_as::<_, FundRecord>(
            r#"
            SELECT symbol, identity, total_shares, total_assets, free_cash, auto_invest_cursor,
                   policy, created_utc
            FROM funds
            ORDER BY symbol
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load funds"))?;

        let shares = sqlx::query_as::<_, ShareBalance>(
            "SELECT symbol, holder, shares FROM fund_shares ORDER BY symbol, holder",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load fund shares"))?;

        let holdings = sqlx::query_as::<_, Holding>(
            "SELECT symbol, loan_id, cost_basis FROM fund_holdings ORDER BY symbol, loan_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load fund holdings"))?;

        let balances = sqlx::query_as::<_, AssetBalance>(
            "SELECT account, balance FROM asset_balances ORDER BY account",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load asset balances"))?;

        Ok(StateSnapshot {
            origination,
            grants,
            buckets,
            loans,
            funds,
            shares,
            holdings,
            released_holdings: Vec::new(),
            balances,
        })
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    async fn write_origination(
        tx: &mut Transaction<'_, Postgres>,
        config: &OriginationConfig,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO origination_config (config_id, next_loan_id, min_principal, max_principal, min_duration_secs, max_duration_secs)
            VALUES (1, $1, $2, $3, $4, $5)
            ON CONFLICT (config_id) DO UPDATE SET
                next_loan_id = EXCLUDED.next_loan_id,
                min_principal = EXCLUDED.min_principal,
                max_principal = EXCLUDED.max_principal,
                min_duration_secs = EXCLUDED.min_duration_secs,
                max_duration_secs = EXCLUDED.max_duration_secs
            "#,
        )
        .bind(config.next_loan_id)
        .bind(config.min_principal)
        .bind(config.max_principal)
        .bind(config.min_duration_secs)
        .bind(config.max_duration_secs)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write origination config"))?;
        Ok(())
    }

    async fn write_grant(tx: &mut Transaction<'_, Postgres>, grant: &Grant) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO module_grants (module, grantee, active, updated_utc)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (module, grantee) DO UPDATE SET
                active = EXCLUDED.active,
                updated_utc = NOW()
            "#,
        )
        .bind(&grant.module)
        .bind(&grant.grantee)
        .bind(grant.active)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write grant"))?;
        Ok(())
    }

    async fn write_bucket(
        tx: &mut Transaction<'_, Postgres>,
        bucket: &RateBucket,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO rate_buckets (bucket_id, rate_per_second, chi, last_drip_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (bucket_id) DO UPDATE SET
                chi = EXCLUDED.chi,
                last_drip_utc = EXCLUDED.last_drip_utc
            "#,
        )
        .bind(bucket.bucket_id)
        .bind(bucket.rate_per_second)
        .bind(bucket.chi)
        .bind(bucket.last_drip_utc)
        .bind(bucket.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write rate bucket"))?;
        Ok(())
    }

    async fn write_loan(tx: &mut Transaction<'_, Postgres>, loan: &Loan) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO loans (loan_id, borrower, principal, duration_secs, bucket_id, status, chi_at_draw,
                               created_utc, funded_utc, funded_by, repaid_amount, closed_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (loan_id) DO UPDATE SET
                status = EXCLUDED.status,
                chi_at_draw = EXCLUDED.chi_at_draw,
                funded_utc = EXCLUDED.funded_utc,
                funded_by = EXCLUDED.funded_by,
                repaid_amount = EXCLUDED.repaid_amount,
                closed_utc = EXCLUDED.closed_utc
            "#,
        )
        .bind(loan.loan_id)
        .bind(&loan.borrower)
        .bind(loan.principal)
        .bind(loan.duration_secs)
        .bind(loan.bucket_id)
        .bind(loan.status.as_str())
        .bind(loan.chi_at_draw)
        .bind(loan.created_utc)
        .bind(loan.funded_utc)
        .bind(&loan.funded_by)
        .bind(loan.repaid_amount)
        .bind(loan.closed_utc)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write loan"))?;
        Ok(())
    }

    async fn write_fund(tx: &mut Transaction<'_, Postgres>, fund: &FundRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO funds (symbol, identity, total_shares, total_assets, free_cash, auto_invest_cursor, policy, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (symbol) DO UPDATE SET
                total_shares = EXCLUDED.total_shares,
                total_assets = EXCLUDED.total_assets,
                free_cash = EXCLUDED.free_cash,
                auto_invest_cursor = EXCLUDED.auto_invest_cursor,
                policy = EXCLUDED.policy
            "#,
        )
        .bind(&fund.symbol)
        .bind(&fund.identity)
        .bind(fund.total_shares)
        .bind(fund.total_assets)
        .bind(fund.free_cash)
        .bind(fund.auto_invest_cursor)
        .bind(&fund.policy)
        .bind(fund.created_utc)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write fund"))?;
        Ok(())
    }

    async fn write_share(
        tx: &mut Transaction<'_, Postgres>,
        share: &ShareBalance,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO fund_shares (symbol, holder, shares)
            VALUES ($1, $2, $3)
            ON CONFLICT (symbol, holder) DO UPDATE SET shares = EXCLUDED.shares
            "#,
        )
        .bind(&share.symbol)
        .bind(&share.holder)
        .bind(share.shares)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write fund shares"))?;
        Ok(())
    }

    async fn write_holding(
        tx: &mut Transaction<'_, Postgres>,
        holding: &Holding,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO fund_holdings (symbol, loan_id, cost_basis)
            VALUES ($1, $2, $3)
            ON CONFLICT (symbol, loan_id) DO UPDATE SET cost_basis = EXCLUDED.cost_basis
            "#,
        )
        .bind(&holding.symbol)
        .bind(holding.loan_id)
        .bind(holding.cost_basis)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write fund holding"))?;
        Ok(())
    }

    async fn release_holding(
        tx: &mut Transaction<'_, Postgres>,
        symbol: &str,
        loan_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query("DELETE FROM fund_holdings WHERE symbol = $1 AND loan_id = $2")
            .bind(symbol)
            .bind(loan_id)
            .execute(&mut **tx)
            .await
            .map_err(db_error("Failed to release fund holding"))?;
        Ok(())
    }

    async fn write_balance(
        tx: &mut Transaction<'_, Postgres>,
        balance: &AssetBalance,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO asset_balances (account, balance, updated_utc)
            VALUES ($1, $2, NOW())
            ON CONFLICT (account) DO UPDATE SET
                balance = EXCLUDED.balance,
                updated_utc = NOW()
            "#,
        )
        .bind(&balance.account)
        .bind(balance.balance)
        .execute(&mut **tx)
        .await
        .map_err(db_error("Failed to write asset balance"))?;
        Ok(())
    }
}

#[async_trait]
impl LendingStore for Database {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<StateSnapshot>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_state"])
            .start_timer();
        let snapshot = self.load_all().await?;
        timer.observe_duration();

        if snapshot.is_empty() {
            return Ok(None);
        }
        info!(
            loans = snapshot.loans.len(),
            funds = snapshot.funds.len(),
            buckets = snapshot.buckets.len(),
            "Engine state loaded"
        );
        Ok(Some(snapshot))
    }

    /// Write a change set in a single transaction.
    #[instrument(skip(self, changes), fields(records = changes.record_count()))]
    async fn persist(&self, changes: &StateSnapshot) -> Result<(), AppError> {
        if changes.is_empty() {
            return Ok(());
        }
        let timer = DB_QUERY_DURATION
            .with_label_values(&["persist_changes"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        if let Some(config) = &changes.origination {
            Self::write_origination(&mut tx, config).await?;
        }
        for grant in &changes.grants {
            Self::write_grant(&mut tx, grant).await?;
        }
        // buckets before loans, loans before holdings (foreign keys)
        for bucket in &changes.buckets {
            Self::write_bucket(&mut tx, bucket).await?;
        }
        for loan in &changes.loans {
            Self::write_loan(&mut tx, loan).await?;
        }
        for fund in &changes.funds {
            Self::write_fund(&mut tx, fund).await?;
        }
        for share in &changes.shares {
            Self::write_share(&mut tx, share).await?;
        }
        for holding in &changes.holdings {
            Self::write_holding(&mut tx, holding).await?;
        }
        for (symbol, loan_id) in &changes.released_holdings {
            Self::release_holding(&mut tx, symbol, *loan_id).await?;
        }
        for balance in &changes.balances {
            Self::write_balance(&mut tx, balance).await?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        debug!(records = changes.record_count(), "Change set persisted");
        Ok(())
    }

    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}
