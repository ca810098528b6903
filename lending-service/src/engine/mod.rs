//! Synchronous accounting core.
//!
//! Nothing in here performs I/O or waits. Every operation either commits
//! all of its effects or returns an error and leaves state as it was.

pub mod access;
pub mod asset;
pub mod clock;
pub mod delegate;
pub mod error;
pub mod fixed_point;
pub mod fund;
pub mod origination;
pub mod pile;
pub mod protocol;

pub use access::{AccessControl, ModuleId};
pub use asset::{AssetLedger, TokenLedger};
pub use clock::{Clock, ManualClock, SystemClock};
pub use delegate::{DelegatePolicy, FundState};
pub use error::LendingError;
pub use fund::{fund_identity, is_fund_identity, AutoInvestOutcome, Fund, Settlement};
pub use origination::{LoanRegistry, ORIGINATION_IDENTITY};
pub use pile::Pile;
pub use protocol::Protocol;
