//! Domain records for lending-service.
//!
//! These are the persisted shapes of engine state; the engine owns the
//! authoritative copies and the store mirrors them row for row.

mod asset;
mod bucket;
mod fund;
mod grant;
mod loan;
mod snapshot;

pub use asset::AssetBalance;
pub use bucket::RateBucket;
pub use fund::{FundRecord, Holding, PolicyConfig, ShareBalance};
pub use grant::Grant;
pub use loan::{Loan, LoanBounds, LoanStatus, LoanTerms, OriginationConfig};
pub use snapshot::StateSnapshot;

/// Registry-wide loan identifier, starting at 1.
pub type LoanId = i64;

/// Rate bucket identifier, starting at 1.
pub type BucketId = i64;
