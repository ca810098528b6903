//! Common test utilities for lending-service integration tests.

#![allow(dead_code)]

use lending_service::config::{AutoInvestConfig, DatabaseConfig, LendingConfig};
use lending_service::engine::{Clock, ManualClock, Protocol};
use lending_service::services::InMemoryStore;
use lending_service::startup::Application;
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde_json::Value;
use service_core::config::Config as CommonConfig;
use std::str::FromStr;
use std::sync::Arc;

pub const ADMIN: &str = "admin";

/// Instant every test clock starts at.
pub const GENESIS: i64 = 1_700_000_000;

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    service_core::observability::init_test_tracing("info,lending_service=debug");
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal literal")
}

/// Fresh engine administered by [`ADMIN`] on a manual clock.
pub fn deploy() -> (Protocol, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::at(GENESIS));
    let engine =
        Protocol::deploy(ADMIN, clock.clone() as Arc<dyn Clock>).expect("Failed to deploy");
    (engine, clock)
}

pub fn test_config() -> LendingConfig {
    LendingConfig {
        common: CommonConfig {
            port: 0,
            environment: "test".to_string(),
        },
        service_name: "lending-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
        },
        deployer_id: ADMIN.to_string(),
        auto_invest: AutoInvestConfig {
            enabled: false,
            ..AutoInvestConfig::default()
        },
    }
}

pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_on(Arc::new(InMemoryStore::new())).await
    }

    /// Spawn an application over an existing store, as a restart would.
    pub async fn spawn_on(store: Arc<InMemoryStore>) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::at(GENESIS));

        let app = Application::build_with_store(
            test_config(),
            store.clone(),
            clock.clone() as Arc<dyn Clock>,
        )
        .await
        .expect("Failed to build test application");

        let address = format!("http://127.0.0.1:{}", app.http_port());

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            client,
            clock,
            store,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        caller: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.address, path));
        if let Some(caller) = caller {
            request = request.header("X-Caller-ID", caller);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str) -> Response {
        self.send(Method::GET, path, None, None).await
    }

    pub async fn post(&self, path: &str, caller: &str, body: Value) -> Response {
        self.send(Method::POST, path, Some(caller), Some(body)).await
    }

    pub async fn put(&self, path: &str, caller: &str, body: Value) -> Response {
        self.send(Method::PUT, path, Some(caller), Some(body)).await
    }

    pub async fn delete(&self, path: &str, caller: &str, body: Value) -> Response {
        self.send(Method::DELETE, path, Some(caller), Some(body)).await
    }

    /// POST that must succeed; returns the JSON body.
    pub async fn post_ok(&self, path: &str, caller: &str, body: Value) -> Value {
        let response = self.post(path, caller, body).await;
        let status = response.status();
        let body: Value = response.json().await.expect("Failed to parse response");
        assert!(status.is_success(), "POST {} failed: {} {}", path, status, body);
        body
    }

    pub async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        let status = response.status();
        let body: Value = response.json().await.expect("Failed to parse response");
        assert!(status.is_success(), "GET {} failed: {} {}", path, status, body);
        body
    }
}

/// Decimal carried as a JSON string.
pub fn decimal(value: &Value) -> Decimal {
    value
        .as_str()
        .map(dec)
        .unwrap_or_else(|| panic!("expected a decimal string, got {}", value))
}
