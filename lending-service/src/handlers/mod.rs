pub mod accounts;
pub mod admin;
pub mod buckets;
pub mod funds;
pub mod health;
pub mod loans;

pub use health::{health_check, metrics_handler, readiness_check};
