//! Capital allocation engine.
//!
//! A fund pools depositor cash into fungible shares and lends it out to
//! loans its delegate policy approves. Its bookkeeping keeps
//!
//! ```text
//! free_cash + sum(cost basis of held loans) == total_assets
//! ```
//!
//! with `free_cash` never negative. Loan state itself stays in the
//! origination registry; a fund only remembers which loans it holds and at
//! what cost.

use crate::engine::access::{AccessControl, ModuleId};
use crate::engine::asset::AssetLedger;
use crate::engine::delegate::{build_policy, DelegatePolicy, FundState};
use crate::engine::error::LendingError;
use crate::engine::fixed_point::{mul_div_floor, validate_amount};
use crate::engine::origination::LoanRegistry;
use crate::engine::pile::Pile;
use crate::models::{
    FundRecord, Grant, Holding, LoanId, LoanStatus, PolicyConfig, ShareBalance,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::types::Json;
use std::collections::BTreeMap;

const MAX_SYMBOL_LEN: usize = 16;

/// Token account and registry identity of the fund with `symbol`.
pub fn fund_identity(symbol: &str) -> String {
    ModuleId::Fund(symbol.to_string()).to_string()
}

/// Whether `account` is in the namespace reserved for fund token accounts.
///
/// Cash in those accounts is tracked by fund bookkeeping, so they never act
/// as depositors, borrowers or payers.
pub fn is_fund_identity(account: &str) -> bool {
    account.starts_with("fund:")
}

fn reject_fund_account(account: &str) -> Result<(), LendingError> {
    if is_fund_identity(account) {
        return Err(LendingError::ReservedAccount(account.to_string()));
    }
    Ok(())
}

/// Result of one auto-invest step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutoInvestOutcome {
    /// No Requested loan beyond the cursor.
    Idle,
    Funded { loan_id: LoanId },
    Declined { loan_id: LoanId },
    /// Funding was attempted and failed; nothing was debited.
    Skipped { loan_id: LoanId, reason: String },
}

/// Realized result of closing out a held loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub cost_basis: Decimal,
    /// Cash returned to the fund; zero for a default.
    pub recovered: Decimal,
    /// Gain (positive) or loss (negative) booked to total assets.
    pub realized: Decimal,
}

#[derive(Debug)]
pub struct Fund {
    symbol: String,
    identity: String,
    access: AccessControl,
    total_shares: Decimal,
    total_assets: Decimal,
    free_cash: Decimal,
    shares: BTreeMap<String, Decimal>,
    holdings: BTreeMap<LoanId, Decimal>,
    auto_invest_cursor: LoanId,
    policy_config: PolicyConfig,
    policy: Box<dyn DelegatePolicy>,
    created_utc: DateTime<Utc>,
}

impl Fund {
    /// Open an empty fund administered by `creator`.
    pub fn new(
        symbol: &str,
        creator: &str,
        policy_config: PolicyConfig,
        now: DateTime<Utc>,
    ) -> Result<Self, LendingError> {
        if symbol.is_empty()
            || symbol.len() > MAX_SYMBOL_LEN
            || !symbol.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(LendingError::OutOfBounds {
                field: "symbol",
                value: symbol.to_string(),
            });
        }
        let policy = build_policy(&policy_config)?;
        Ok(Self {
            symbol: symbol.to_string(),
            identity: fund_identity(symbol),
            access: AccessControl::new(ModuleId::Fund(symbol.to_string()), creator),
            total_shares: Decimal::ZERO,
            total_assets: Decimal::ZERO,
            free_cash: Decimal::ZERO,
            shares: BTreeMap::new(),
            holdings: BTreeMap::new(),
            auto_invest_cursor: 0,
            policy_config,
            policy,
            created_utc: now,
        })
    }

    pub fn restore(
        record: FundRecord,
        grants: &[Grant],
        shares: Vec<ShareBalance>,
        holdings: Vec<Holding>,
    ) -> Result<Self, LendingError> {
        let policy_config = record.policy.0;
        let policy = build_policy(&policy_config)?;
        let module = ModuleId::Fund(record.symbol.clone());
        Ok(Self {
            access: AccessControl::restore(module, grants),
            shares: shares
                .into_iter()
                .filter(|s| s.symbol == record.symbol)
                .map(|s| (s.holder, s.shares))
                .collect(),
            holdings: holdings
                .into_iter()
                .filter(|h| h.symbol == record.symbol)
                .map(|h| (h.loan_id, h.cost_basis))
                .collect(),
            symbol: record.symbol,
            identity: record.identity,
            total_shares: record.total_shares,
            total_assets: record.total_assets,
            free_cash: record.free_cash,
            auto_invest_cursor: record.auto_invest_cursor,
            policy_config,
            policy,
            created_utc: record.created_utc,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut AccessControl {
        &mut self.access
    }

    pub fn policy_config(&self) -> &PolicyConfig {
        &self.policy_config
    }

    pub fn auto_invest_cursor(&self) -> LoanId {
        self.auto_invest_cursor
    }

    pub fn shares_of(&self, holder: &str) -> Decimal {
        self.shares.get(holder).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn holds(&self, loan_id: LoanId) -> bool {
        self.holdings.contains_key(&loan_id)
    }

    pub fn held_loans(&self) -> impl Iterator<Item = LoanId> + '_ {
        self.holdings.keys().copied()
    }

    pub fn state(&self) -> FundState {
        FundState {
            total_assets: self.total_assets,
            total_shares: self.total_shares,
            free_cash: self.free_cash,
            held_principal: self.holdings.values().copied().sum(),
            held_count: self.holdings.len(),
        }
    }

    /// Whether the ledger identities hold. Does not look at the token
    /// balance; see [`Fund::is_backed_by`].
    pub fn check_invariants(&self) -> bool {
        let held: Decimal = self.holdings.values().copied().sum();
        let issued: Decimal = self.shares.values().copied().sum();
        self.free_cash >= Decimal::ZERO
            && self.free_cash + held == self.total_assets
            && issued == self.total_shares
    }

    /// Whether every unit of free cash is held in the fund's token account.
    pub fn is_backed_by(&self, asset: &impl AssetLedger) -> bool {
        self.free_cash <= asset.balance_of(&self.identity)
    }

    pub fn record(&self) -> FundRecord {
        FundRecord {
            symbol: self.symbol.clone(),
            identity: self.identity.clone(),
            total_shares: self.total_shares,
            total_assets: self.total_assets,
            free_cash: self.free_cash,
            auto_invest_cursor: self.auto_invest_cursor,
            policy: Json(self.policy_config.clone()),
            created_utc: self.created_utc,
        }
    }

    pub fn share_record(&self, holder: &str) -> ShareBalance {
        ShareBalance {
            symbol: self.symbol.clone(),
            holder: holder.to_string(),
            shares: self.shares_of(holder),
        }
    }

    pub fn share_records(&self) -> Vec<ShareBalance> {
        self.shares.keys().map(|h| self.share_record(h)).collect()
    }

    pub fn holding_record(&self, loan_id: LoanId) -> Option<Holding> {
        self.holdings.get(&loan_id).map(|basis| Holding {
            symbol: self.symbol.clone(),
            loan_id,
            cost_basis: *basis,
        })
    }

    pub fn holding_records(&self) -> Vec<Holding> {
        self.holdings
            .keys()
            .filter_map(|id| self.holding_record(*id))
            .collect()
    }

    pub fn set_policy(&mut self, caller: &str, config: PolicyConfig) -> Result<(), LendingError> {
        self.access.require_permitted(caller)?;
        self.policy = build_policy(&config)?;
        self.policy_config = config;
        Ok(())
    }

    /// Pull `amount` from the depositor and mint shares at the current price.
    pub fn deposit(
        &mut self,
        asset: &mut impl AssetLedger,
        depositor: &str,
        amount: Decimal,
    ) -> Result<Decimal, LendingError> {
        reject_fund_account(depositor)?;
        let amount = validate_amount(amount)?;
        let minted = if self.total_shares.is_zero() {
            amount
        } else if self.total_assets.is_zero() {
            return Err(LendingError::Insolvent(self.symbol.clone()));
        } else {
            mul_div_floor(amount, self.total_shares, self.total_assets)?
        };
        if minted.is_zero() {
            return Err(LendingError::InvalidAmount(amount));
        }

        if !asset.transfer_from(depositor, &self.identity, amount) {
            return Err(LendingError::TransferFailed {
                from: depositor.to_string(),
                to: self.identity.clone(),
                amount,
            });
        }

        *self.shares.entry(depositor.to_string()).or_insert(Decimal::ZERO) += minted;
        self.total_shares += minted;
        self.total_assets += amount;
        self.free_cash += amount;
        Ok(minted)
    }

    /// Burn `shares` and pay out their value from free cash.
    pub fn withdraw(
        &mut self,
        asset: &mut impl AssetLedger,
        depositor: &str,
        shares: Decimal,
    ) -> Result<Decimal, LendingError> {
        reject_fund_account(depositor)?;
        let shares = validate_amount(shares)?;
        let held = self.shares_of(depositor);
        if held < shares {
            return Err(LendingError::InsufficientShares {
                requested: shares,
                held,
            });
        }
        let payout = mul_div_floor(shares, self.total_assets, self.total_shares)?;
        if payout.is_zero() {
            return Err(LendingError::InvalidAmount(shares));
        }
        if payout > self.free_cash {
            return Err(LendingError::InsufficientLiquidity {
                requested: payout,
                available: self.free_cash,
            });
        }

        if !asset.transfer_from(&self.identity, depositor, payout) {
            return Err(LendingError::TransferFailed {
                from: self.identity.clone(),
                to: depositor.to_string(),
                amount: payout,
            });
        }

        self.shares.insert(depositor.to_string(), held - shares);
        self.total_shares -= shares;
        self.total_assets -= payout;
        self.free_cash -= payout;
        Ok(payout)
    }

    /// Ask the delegate policy about a Requested loan. Changes nothing.
    pub fn consider(&self, registry: &LoanRegistry, loan_id: LoanId) -> Result<bool, LendingError> {
        let loan = registry.loan(loan_id)?;
        if loan.status != LoanStatus::Requested {
            return Err(LendingError::invalid_state(
                loan_id,
                format!("loan is {}, not requested", loan.status),
            ));
        }
        Ok(self.policy.approve(&loan.terms(), &self.state()))
    }

    /// Fund `loan_id` out of free cash.
    ///
    /// Disbursement to the borrower and the registry transition commit
    /// together; if either fails the fund, the ledger and the loan are left
    /// as they were.
    pub fn invest(
        &mut self,
        asset: &mut impl AssetLedger,
        registry: &mut LoanRegistry,
        pile: &mut Pile,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LendingError> {
        let terms = registry.check_fundable(loan_id, &self.identity)?.terms();
        reject_fund_account(&terms.borrower)?;
        if !self.policy.approve(&terms, &self.state()) {
            return Err(LendingError::PolicyDeclined {
                fund: self.symbol.clone(),
                loan_id,
            });
        }
        if terms.principal > self.free_cash {
            return Err(LendingError::InsufficientLiquidity {
                requested: terms.principal,
                available: self.free_cash,
            });
        }

        if !asset.transfer_from(&self.identity, &terms.borrower, terms.principal) {
            return Err(LendingError::TransferFailed {
                from: self.identity.clone(),
                to: terms.borrower,
                amount: terms.principal,
            });
        }
        if let Err(e) = registry.fund_loan(pile, loan_id, &self.identity, now) {
            if !asset.transfer_from(&terms.borrower, &self.identity, terms.principal) {
                tracing::error!(
                    fund = %self.symbol,
                    loan_id,
                    "Failed to reverse disbursement after funding error"
                );
            }
            return Err(e);
        }

        self.free_cash -= terms.principal;
        self.holdings.insert(loan_id, terms.principal);
        Ok(terms.principal)
    }

    /// Evaluate the earliest Requested loan the fund has not looked at in
    /// the current pass.
    ///
    /// The cursor moves past the loan whatever the outcome, so a declined or
    /// failed loan is not retried within the pass. Running out of requests
    /// ends the pass: the cursor rewinds and the next step starts again from
    /// the oldest request, picking up loans that became fundable since.
    pub fn auto_invest(
        &mut self,
        asset: &mut impl AssetLedger,
        registry: &mut LoanRegistry,
        pile: &mut Pile,
        now: DateTime<Utc>,
    ) -> AutoInvestOutcome {
        let Some(loan_id) = registry
            .first_requested_after(self.auto_invest_cursor)
            .map(|loan| loan.loan_id)
        else {
            self.auto_invest_cursor = 0;
            return AutoInvestOutcome::Idle;
        };
        self.auto_invest_cursor = loan_id;

        match self.invest(asset, registry, pile, loan_id, now) {
            Ok(_) => AutoInvestOutcome::Funded { loan_id },
            Err(LendingError::PolicyDeclined { .. }) => AutoInvestOutcome::Declined { loan_id },
            Err(e) => AutoInvestOutcome::Skipped {
                loan_id,
                reason: e.code().to_string(),
            },
        }
    }

    fn held_basis(&self, loan_id: LoanId) -> Result<Decimal, LendingError> {
        self.holdings.get(&loan_id).copied().ok_or_else(|| {
            LendingError::invalid_state(
                loan_id,
                format!("loan is not held by fund {}", self.symbol),
            )
        })
    }

    /// Book a repaid loan: its repayment returns to free cash.
    pub fn settle_repayment(
        &mut self,
        registry: &LoanRegistry,
        loan_id: LoanId,
    ) -> Result<Settlement, LendingError> {
        let cost_basis = self.held_basis(loan_id)?;
        let loan = registry.loan(loan_id)?;
        let recovered = match (loan.status, loan.repaid_amount) {
            (LoanStatus::Repaid, Some(amount)) => amount,
            _ => {
                return Err(LendingError::invalid_state(
                    loan_id,
                    format!("loan is {}, not repaid", loan.status),
                ))
            }
        };
        let realized = recovered - cost_basis;

        self.holdings.remove(&loan_id);
        self.free_cash += recovered;
        self.total_assets += realized;
        Ok(Settlement {
            loan_id,
            status: LoanStatus::Repaid,
            cost_basis,
            recovered,
            realized,
        })
    }

    /// Write off a defaulted loan's cost basis.
    pub fn settle_default(
        &mut self,
        registry: &LoanRegistry,
        loan_id: LoanId,
    ) -> Result<Settlement, LendingError> {
        let cost_basis = self.held_basis(loan_id)?;
        let loan = registry.loan(loan_id)?;
        if loan.status != LoanStatus::Defaulted {
            return Err(LendingError::invalid_state(
                loan_id,
                format!("loan is {}, not defaulted", loan.status),
            ));
        }

        self.holdings.remove(&loan_id);
        self.total_assets -= cost_basis;
        Ok(Settlement {
            loan_id,
            status: LoanStatus::Defaulted,
            cost_basis,
            recovered: Decimal::ZERO,
            realized: -cost_basis,
        })
    }

    /// Settle a held loan according to its terminal status.
    pub fn settle(
        &mut self,
        registry: &LoanRegistry,
        loan_id: LoanId,
    ) -> Result<Settlement, LendingError> {
        match registry.loan(loan_id)?.status {
            LoanStatus::Defaulted => self.settle_default(registry, loan_id),
            _ => self.settle_repayment(registry, loan_id),
        }
    }

    /// Settle every held loan that has reached a terminal status.
    pub fn sweep(&mut self, registry: &LoanRegistry) -> Vec<Settlement> {
        let closed: Vec<LoanId> = self
            .holdings
            .keys()
            .copied()
            .filter(|id| {
                registry
                    .loan(*id)
                    .map(|loan| loan.status.is_terminal())
                    .unwrap_or(false)
            })
            .collect();

        closed
            .into_iter()
            .filter_map(|id| self.settle(registry, id).ok())
            .collect()
    }
}
