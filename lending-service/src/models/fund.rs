//! Fund ledger models for the capital allocation engine.

use super::LoanId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Persisted configuration of a fund's investment delegate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Approve any request the fund has free cash for.
    WhitelistAll,
    /// Approve only listed borrowers.
    BorrowerAllowList { borrowers: Vec<String> },
    /// Cap a single loan at `max_share` of total assets.
    ConcentrationLimit { max_share: Decimal },
    /// Every inner policy must approve.
    AllOf { policies: Vec<PolicyConfig> },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::WhitelistAll
    }
}

/// Fund ledger header row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FundRecord {
    pub symbol: String,
    pub identity: String,
    pub total_shares: Decimal,
    pub total_assets: Decimal,
    pub free_cash: Decimal,
    /// Highest loan id the auto-investor has already evaluated.
    pub auto_invest_cursor: LoanId,
    pub policy: Json<PolicyConfig>,
    pub created_utc: DateTime<Utc>,
}

/// A loan held by a fund at its draw-time cost basis.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub loan_id: LoanId,
    pub cost_basis: Decimal,
}

/// Shares of a fund owned by one depositor.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ShareBalance {
    pub symbol: String,
    pub holder: String,
    pub shares: Decimal,
}
