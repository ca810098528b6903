//! Background driver that keeps every fund investing.
//!
//! Each tick steps every fund's auto-investor until it goes idle and settles
//! loans that have closed. While there is nothing to do the loop sleeps
//! for exponentially longer, capped at the configured maximum; any activity
//! or error resets it to the base poll interval.

use crate::config::AutoInvestConfig;
use crate::services::LendingService;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct AutoInvestWorker {
    service: Arc<LendingService>,
    config: AutoInvestConfig,
    shutdown: CancellationToken,
}

impl AutoInvestWorker {
    pub fn new(
        service: Arc<LendingService>,
        config: AutoInvestConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            config,
            shutdown,
        }
    }

    fn idle_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.poll_interval())
            .with_max_interval(self.config.max_backoff())
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build()
    }

    pub async fn run(self) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_backoff_ms = self.config.max_backoff_ms,
            "Auto-invest worker started"
        );

        let mut idle = self.idle_backoff();
        loop {
            let delay = match self.service.auto_invest_tick().await {
                Ok(report) if report.is_idle() => idle
                    .next_backoff()
                    .unwrap_or_else(|| self.config.max_backoff()),
                Ok(report) => {
                    tracing::info!(
                        funded = report.funded,
                        declined = report.declined,
                        skipped = report.skipped,
                        settled = report.settled,
                        "Auto-invest tick"
                    );
                    idle.reset();
                    self.config.poll_interval()
                }
                Err(e) => {
                    tracing::error!(error = %e, "Auto-invest tick failed");
                    idle.reset();
                    self.config.poll_interval()
                }
            };

            if !self.sleep(delay).await {
                break;
            }
        }

        tracing::info!("Auto-invest worker stopped");
    }

    /// Returns false once shutdown was requested.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
