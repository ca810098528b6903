use super::{
    AssetBalance, FundRecord, Grant, Holding, Loan, LoanId, OriginationConfig, RateBucket,
    ShareBalance,
};
use serde::{Deserialize, Serialize};

/// A set of engine records to persist, or the whole persisted state on load.
///
/// Upserts are keyed by each record's natural key. `released_holdings` lists
/// `(fund symbol, loan id)` pairs a fund no longer holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub origination: Option<OriginationConfig>,
    pub grants: Vec<Grant>,
    pub buckets: Vec<RateBucket>,
    pub loans: Vec<Loan>,
    pub funds: Vec<FundRecord>,
    pub shares: Vec<ShareBalance>,
    pub holdings: Vec<Holding>,
    pub released_holdings: Vec<(String, LoanId)>,
    pub balances: Vec<AssetBalance>,
}

impl StateSnapshot {
    pub fn is_empty(&self) -> bool {
        self.origination.is_none()
            && self.grants.is_empty()
            && self.buckets.is_empty()
            && self.loans.is_empty()
            && self.funds.is_empty()
            && self.shares.is_empty()
            && self.holdings.is_empty()
            && self.released_holdings.is_empty()
            && self.balances.is_empty()
    }

    /// Number of records touched, for logging.
    pub fn record_count(&self) -> usize {
        usize::from(self.origination.is_some())
            + self.grants.len()
            + self.buckets.len()
            + self.loans.len()
            + self.funds.len()
            + self.shares.len()
            + self.holdings.len()
            + self.released_holdings.len()
            + self.balances.len()
    }
}
