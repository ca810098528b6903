//! Serialized access to the lending engine.
//!
//! All state-changing operations run one at a time under a single async
//! mutex. The change set an operation produces is written to the store
//! before the lock is released, so no other operation observes state that
//! is not durable.

use crate::engine::{AutoInvestOutcome, Clock, LendingError, Protocol};
use crate::error::ApiError;
use crate::services::metrics::{record_error, record_fund_operation, record_loan_transition};
use crate::services::store::LendingStore;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on auto-invest steps per fund in one tick.
const MAX_STEPS_PER_TICK: usize = 32;

/// What one pass of the auto-investor did across all funds.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub funded: usize,
    pub declined: usize,
    pub skipped: usize,
    pub settled: usize,
}

impl TickReport {
    /// Nothing was funded or settled. Declines and skips repeat on every
    /// pass until conditions change, so they do not count as activity.
    pub fn is_idle(&self) -> bool {
        self.funded == 0 && self.settled == 0
    }
}

pub struct LendingService {
    engine: Mutex<Protocol>,
    store: Arc<dyn LendingStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LendingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LendingService").finish_non_exhaustive()
    }
}

fn restore_error(err: LendingError) -> AppError {
    AppError::InternalError(anyhow::anyhow!("Persisted state is inconsistent: {}", err))
}

impl LendingService {
    /// Rebuild the engine from `store`, or deploy a fresh one owned by
    /// `deployer` when the store is empty.
    #[instrument(skip(store, clock))]
    pub async fn open(
        store: Arc<dyn LendingStore>,
        clock: Arc<dyn Clock>,
        deployer: &str,
    ) -> Result<Self, AppError> {
        let engine = match store.load().await? {
            Some(snapshot) => {
                let engine = Protocol::restore(snapshot, clock.clone()).map_err(restore_error)?;
                info!(next_loan_id = engine.next_loan_id(), "Engine restored from store");
                engine
            }
            None => {
                let mut engine =
                    Protocol::deploy(deployer, clock.clone()).map_err(restore_error)?;
                store.persist(&engine.take_changes()).await?;
                info!(deployer = deployer, "Fresh deployment created");
                engine
            }
        };

        Ok(Self {
            engine: Mutex::new(engine),
            store,
            clock,
        })
    }

    /// Run a state-changing operation and persist what it touched.
    ///
    /// On an engine error nothing was changed. On a store error the engine
    /// is reloaded from the store, which drops the unpersisted effects.
    pub async fn execute<T, F>(&self, operation: &'static str, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Protocol) -> Result<T, LendingError>,
    {
        let mut engine = self.engine.lock().await;

        let value = match op(&mut *engine) {
            Ok(value) => value,
            Err(err) => {
                if engine.has_changes() {
                    // partial writes (a drip, an earlier step) no longer match the store
                    warn!(
                        operation = operation,
                        code = err.code(),
                        "Operation failed after mutating state, reloading engine"
                    );
                    self.rebuild(&mut *engine).await;
                }
                engine.discard_changes();
                record_error(err.code());
                debug!(operation = operation, code = err.code(), error = %err, "Operation rejected");
                return Err(err.into());
            }
        };

        let changes = engine.take_changes();
        if let Err(err) = self.store.persist(&changes).await {
            error!(operation = operation, error = %err, "Failed to persist changes, reloading engine");
            record_error("persistence");
            self.rebuild(&mut *engine).await;
            return Err(err.into());
        }

        Ok(value)
    }

    /// Run a query against the current state.
    pub async fn read<T, F>(&self, query: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Protocol) -> Result<T, LendingError>,
    {
        let engine = self.engine.lock().await;
        query(&*engine).map_err(|err| {
            record_error(err.code());
            err.into()
        })
    }

    async fn reload(&self) -> Result<Protocol, AppError> {
        match self.store.load().await? {
            Some(snapshot) => Protocol::restore(snapshot, self.clock.clone()).map_err(restore_error),
            None => Err(AppError::InternalError(anyhow::anyhow!(
                "Store is empty, cannot reload engine"
            ))),
        }
    }

    async fn rebuild(&self, engine: &mut Protocol) {
        match self.reload().await {
            Ok(reloaded) => *engine = reloaded,
            Err(err) => error!(error = %err, "Failed to reload engine from store"),
        }
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.store.health_check().await
    }

    /// One pass of the auto-investor: step every fund until it reaches the
    /// end of the request queue, then settle whatever loans of theirs have
    /// closed. Loans declined on an earlier pass are evaluated again.
    #[instrument(skip(self))]
    pub async fn auto_invest_tick(&self) -> Result<TickReport, ApiError> {
        let mut report = TickReport::default();
        let symbols = self.read(|p| Ok(p.fund_symbols())).await?;

        for symbol in symbols {
            for _ in 0..MAX_STEPS_PER_TICK {
                let outcome = self
                    .execute("auto_invest", |p| p.auto_invest(&symbol))
                    .await?;
                match outcome {
                    AutoInvestOutcome::Idle => break,
                    AutoInvestOutcome::Funded { loan_id } => {
                        info!(fund = %symbol, loan_id = loan_id, "Auto-invest funded loan");
                        record_fund_operation("auto_invest", "funded");
                        record_loan_transition("funded");
                        report.funded += 1;
                    }
                    AutoInvestOutcome::Declined { loan_id } => {
                        debug!(fund = %symbol, loan_id = loan_id, "Auto-invest declined loan");
                        record_fund_operation("auto_invest", "declined");
                        report.declined += 1;
                    }
                    AutoInvestOutcome::Skipped { loan_id, reason } => {
                        warn!(fund = %symbol, loan_id = loan_id, reason = %reason, "Auto-invest skipped loan");
                        record_fund_operation("auto_invest", "skipped");
                        report.skipped += 1;
                    }
                }
            }

            let settlements = self.execute("sweep", |p| p.sweep(&symbol)).await?;
            for settlement in &settlements {
                info!(
                    fund = %symbol,
                    loan_id = settlement.loan_id,
                    status = %settlement.status,
                    realized = %settlement.realized,
                    "Settled closed loan"
                );
                record_fund_operation("settle", settlement.status.as_str());
            }
            report.settled += settlements.len();
        }

        Ok(report)
    }
}
