//! Error taxonomy of the lending engine.
//!
//! Every failure is local and synchronous: the engine never retries, and a
//! failed operation leaves all state unchanged. Callers branch on the variant
//! (or on [`LendingError::code`] over the wire) to tell a lost funding race
//! (`InvalidState`) apart from missing cash or a missing grant.

use crate::engine::access::ModuleId;
use crate::models::{BucketId, LoanId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LendingError {
    #[error("{caller} is not permitted on module {module}")]
    Unauthorized { module: ModuleId, caller: String },

    #[error("revoking {grantee} would leave module {module} without an administrator")]
    WouldOrphanModule { module: ModuleId, grantee: String },

    #[error("invalid rate {0}: must be >= 1 with at most 18 decimal places")]
    InvalidRate(Decimal),

    #[error("unknown rate bucket {0}")]
    UnknownBucket(BucketId),

    #[error("unknown loan {0}")]
    UnknownLoan(LoanId),

    #[error("unknown fund {0}")]
    UnknownFund(String),

    #[error("{field} {value} is outside the configured bounds")]
    OutOfBounds { field: &'static str, value: String },

    #[error("loan {loan_id}: {reason}")]
    InvalidState { loan_id: LoanId, reason: String },

    #[error("repayment of {amount} for loan {loan_id} is below the outstanding debt {debt}")]
    InsufficientRepayment {
        loan_id: LoanId,
        amount: Decimal,
        debt: Decimal,
    },

    #[error("repayment of {amount} for loan {loan_id} exceeds the outstanding debt {debt}")]
    Overpayment {
        loan_id: LoanId,
        amount: Decimal,
        debt: Decimal,
    },

    #[error("insufficient liquidity: {requested} requested, {available} free")]
    InsufficientLiquidity {
        requested: Decimal,
        available: Decimal,
    },

    #[error("invalid amount {0}: must be a positive whole number of base units")]
    InvalidAmount(Decimal),

    #[error("insufficient shares: {requested} requested, {held} held")]
    InsufficientShares { requested: Decimal, held: Decimal },

    #[error("transfer of {amount} from {from} to {to} failed")]
    TransferFailed {
        from: String,
        to: String,
        amount: Decimal,
    },

    #[error("fund {0} already exists")]
    FundExists(String),

    #[error("fund {0} has outstanding shares but no assets")]
    Insolvent(String),

    #[error("account {0} belongs to a fund and cannot deposit, borrow or repay")]
    ReservedAccount(String),

    #[error("fund {fund} declined loan {loan_id}")]
    PolicyDeclined { fund: String, loan_id: LoanId },

    #[error("arithmetic overflow while {0}")]
    ArithmeticOverflow(&'static str),
}

impl LendingError {
    /// Stable machine-readable identifier of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            LendingError::Unauthorized { .. } => "unauthorized",
            LendingError::WouldOrphanModule { .. } => "would_orphan_module",
            LendingError::InvalidRate(_) => "invalid_rate",
            LendingError::UnknownBucket(_) => "unknown_bucket",
            LendingError::UnknownLoan(_) => "unknown_loan",
            LendingError::UnknownFund(_) => "unknown_fund",
            LendingError::OutOfBounds { .. } => "out_of_bounds",
            LendingError::InvalidState { .. } => "invalid_state",
            LendingError::InsufficientRepayment { .. } => "insufficient_repayment",
            LendingError::Overpayment { .. } => "overpayment",
            LendingError::InsufficientLiquidity { .. } => "insufficient_liquidity",
            LendingError::InvalidAmount(_) => "invalid_amount",
            LendingError::InsufficientShares { .. } => "insufficient_shares",
            LendingError::TransferFailed { .. } => "transfer_failed",
            LendingError::FundExists(_) => "fund_exists",
            LendingError::Insolvent(_) => "insolvent",
            LendingError::ReservedAccount(_) => "reserved_account",
            LendingError::PolicyDeclined { .. } => "policy_declined",
            LendingError::ArithmeticOverflow(_) => "arithmetic_overflow",
        }
    }

    pub(crate) fn invalid_state(loan_id: LoanId, reason: impl Into<String>) -> Self {
        LendingError::InvalidState {
            loan_id,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_snake_case_kinds() {
        let err = LendingError::Unauthorized {
            module: ModuleId::Origination,
            caller: "mallory".to_string(),
        };
        assert_eq!(err.code(), "unauthorized");
        assert_eq!(err.to_string(), "mallory is not permitted on module origination");

        let err = LendingError::invalid_state(7, "loan is not requested");
        assert_eq!(err.code(), "invalid_state");
        assert_eq!(err.to_string(), "loan 7: loan is not requested");
    }
}
