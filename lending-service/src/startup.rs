//! Application startup and lifecycle management.

use crate::config::LendingConfig;
use crate::engine::{Clock, SystemClock};
use crate::handlers::{accounts, admin, buckets, funds, health_check, loans, metrics_handler, readiness_check};
use crate::services::{init_metrics, Database, LendingService, LendingStore};
use crate::workers::AutoInvestWorker;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: LendingConfig,
    pub service: Arc<LendingService>,
}

/// HTTP routes of the service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/admin/grants", post(admin::grant).delete(admin::revoke))
        .route("/admin/buckets", post(admin::create_bucket))
        .route("/admin/bounds", put(admin::set_bounds))
        .route("/admin/mint", post(admin::mint))
        .route("/buckets/:id", get(buckets::get_bucket))
        .route("/buckets/:id/drip", post(buckets::drip))
        .route("/loans", post(loans::request_loan))
        .route("/loans/requested", get(loans::list_requested))
        .route("/loans/next-id", get(loans::next_loan_id))
        .route("/loans/:id", get(loans::get_loan))
        .route("/loans/:id/debt", get(loans::get_debt))
        .route("/loans/:id/fund", post(loans::fund_loan))
        .route("/loans/:id/repay", post(loans::repay))
        .route("/loans/:id/default", post(loans::mark_default))
        .route("/funds", post(funds::create_fund).get(funds::list_funds))
        .route("/funds/:symbol", get(funds::get_fund))
        .route("/funds/:symbol/policy", put(funds::set_policy))
        .route("/funds/:symbol/deposit", post(funds::deposit))
        .route("/funds/:symbol/withdraw", post(funds::withdraw))
        .route("/funds/:symbol/consider/:loan_id", get(funds::consider))
        .route("/funds/:symbol/invest/:loan_id", post(funds::invest))
        .route("/funds/:symbol/auto-invest", post(funds::auto_invest))
        .route("/funds/:symbol/settle/:loan_id", post(funds::settle))
        .route("/accounts/:id/balance", get(accounts::get_balance))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application backed by PostgreSQL, running migrations.
    pub async fn build(config: LendingConfig) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        Self::build_with_store(config, Arc::new(db), Arc::new(SystemClock)).await
    }

    /// Build the application on an arbitrary store and clock.
    /// Tests use this with the in-memory store and a manual clock.
    pub async fn build_with_store(
        config: LendingConfig,
        store: Arc<dyn LendingStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let service = LendingService::open(store, clock, &config.deployer_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to open lending engine");
                e
            })?;

        let state = AppState {
            config: config.clone(),
            service: Arc::new(service),
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Lending service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
            shutdown: CancellationToken::new(),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn service(&self) -> Arc<LendingService> {
        self.state.service.clone()
    }

    /// Token that stops the background worker when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let auto_invest = &self.state.config.auto_invest;
        let worker = if auto_invest.enabled {
            let worker = AutoInvestWorker::new(
                self.state.service.clone(),
                auto_invest.clone(),
                self.shutdown.clone(),
            );
            Some(tokio::spawn(worker.run()))
        } else {
            tracing::info!("Auto-invest worker disabled by configuration");
            None
        };

        let http_router = router(self.state.clone());

        tracing::info!(
            service = "lending-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let shutdown = self.shutdown.clone();
        let result = axum::serve(self.http_listener, http_router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown.cancel();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Auto-invest worker panicked");
            }
        }

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
