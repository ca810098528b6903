//! Configuration module for lending-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LendingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    /// Identity that administers a fresh deployment.
    pub deployer_id: String,
    pub auto_invest: AutoInvestConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AutoInvestConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub max_backoff_ms: u64,
}

impl AutoInvestConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.poll_interval_ms.max(1)))
    }
}

impl Default for AutoInvestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl LendingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = AutoInvestConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "lending-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(10),
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS").unwrap_or(2),
            },
            deployer_id: env::var("DEPLOYER_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "deployer".to_string()),
            auto_invest: AutoInvestConfig {
                enabled: parse_env("AUTO_INVEST_ENABLED").unwrap_or(defaults.enabled),
                poll_interval_ms: parse_env("AUTO_INVEST_POLL_MS")
                    .unwrap_or(defaults.poll_interval_ms),
                max_backoff_ms: parse_env("AUTO_INVEST_MAX_BACKOFF_MS")
                    .unwrap_or(defaults.max_backoff_ms),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_undercuts_the_poll_interval() {
        let config = AutoInvestConfig {
            enabled: true,
            poll_interval_ms: 500,
            max_backoff_ms: 100,
        };
        assert_eq!(config.max_backoff(), Duration::from_millis(500));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }
}
