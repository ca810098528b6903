//! Prometheus metrics for lending-service.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

/// Recorder behind the HTTP request metrics emitted by the shared middleware.
static HTTP_METRICS: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Loan lifecycle transitions by resulting status.
pub static LOAN_TRANSITIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lending_loan_transitions_total",
        "Total number of loan state transitions",
        &["status"]
    )
    .expect("Failed to register loan_transitions_total")
});

/// Fund operations by kind and outcome.
pub static FUND_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lending_fund_operations_total",
        "Total number of fund operations",
        &["operation", "outcome"]
    )
    .expect("Failed to register fund_operations_total")
});

/// Engine errors by machine-readable code.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "lending_errors_total",
        "Total number of rejected operations by error code",
        &["code"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "lending_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
///
/// Safe to call more than once; the HTTP recorder is installed on first use.
pub fn init_metrics() {
    HTTP_METRICS.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "HTTP metrics recorder not installed");
            None
        }
    });
    Lazy::force(&LOAN_TRANSITIONS);
    Lazy::force(&FUND_OPERATIONS);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut body = encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default();
    if let Some(Some(handle)) = HTTP_METRICS.get() {
        body.push_str(&handle.render());
    }
    body
}

/// Record a loan entering `status`.
pub fn record_loan_transition(status: &str) {
    LOAN_TRANSITIONS.with_label_values(&[status]).inc();
}

/// Record a fund operation.
pub fn record_fund_operation(operation: &str, outcome: &str) {
    FUND_OPERATIONS
        .with_label_values(&[operation, outcome])
        .inc();
}

/// Record a rejected operation.
pub fn record_error(code: &str) {
    ERRORS_TOTAL.with_label_values(&[code]).inc();
}
