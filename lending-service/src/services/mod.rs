//! Services module for lending-service.

pub mod database;
pub mod lending;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use lending::{LendingService, TickReport};
pub use metrics::{
    get_metrics, init_metrics, record_error, record_fund_operation, record_loan_transition,
};
pub use store::{InMemoryStore, LendingStore};
