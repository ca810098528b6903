use crate::engine::Fund;
use crate::models::{Holding, LoanId, PolicyConfig};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFundRequest {
    #[validate(length(min = 1, max = 16, message = "Symbol must be 1-16 characters"))]
    pub symbol: String,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Deserialize)]
pub struct SetPolicyRequest {
    pub policy: PolicyConfig,
}

#[derive(Debug, Serialize)]
pub struct FundResponse {
    pub symbol: String,
    pub identity: String,
    pub total_shares: Decimal,
    pub total_assets: Decimal,
    pub free_cash: Decimal,
    pub auto_invest_cursor: LoanId,
    pub policy: PolicyConfig,
    pub holdings: Vec<Holding>,
    pub created_utc: DateTime<Utc>,
}

impl From<&Fund> for FundResponse {
    fn from(fund: &Fund) -> Self {
        let record = fund.record();
        Self {
            symbol: record.symbol,
            identity: record.identity,
            total_shares: record.total_shares,
            total_assets: record.total_assets,
            free_cash: record.free_cash,
            auto_invest_cursor: record.auto_invest_cursor,
            policy: record.policy.0,
            holdings: fund.holding_records(),
            created_utc: record.created_utc,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub symbol: String,
    pub depositor: String,
    pub shares_minted: Decimal,
    pub shares_held: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub shares: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    pub symbol: String,
    pub depositor: String,
    pub payout: Decimal,
    pub shares_held: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ConsiderResponse {
    pub symbol: String,
    pub loan_id: LoanId,
    pub approved: bool,
}

#[derive(Debug, Serialize)]
pub struct InvestResponse {
    pub symbol: String,
    pub loan_id: LoanId,
    pub principal: Decimal,
}
