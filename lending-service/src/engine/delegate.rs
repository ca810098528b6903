//! Investment delegate policies.
//!
//! A fund asks its policy a single question per loan request:
//! `approve(terms, state)`. Every built-in policy refuses a loan the fund
//! cannot pay for out of free cash, then layers its own rule on top.

use crate::engine::error::LendingError;
use crate::models::{LoanTerms, PolicyConfig};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;

/// Fund figures a policy may base its decision on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundState {
    pub total_assets: Decimal,
    pub total_shares: Decimal,
    pub free_cash: Decimal,
    pub held_principal: Decimal,
    pub held_count: usize,
}

pub trait DelegatePolicy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn approve(&self, terms: &LoanTerms, state: &FundState) -> bool;
}

fn has_cash_for(terms: &LoanTerms, state: &FundState) -> bool {
    state.free_cash >= terms.principal
}

/// Fund anything there is free cash for.
#[derive(Debug, Default)]
pub struct WhitelistAll;

impl DelegatePolicy for WhitelistAll {
    fn name(&self) -> &'static str {
        "whitelist_all"
    }

    fn approve(&self, terms: &LoanTerms, state: &FundState) -> bool {
        has_cash_for(terms, state)
    }
}

#[derive(Debug)]
pub struct BorrowerAllowList {
    borrowers: BTreeSet<String>,
}

impl DelegatePolicy for BorrowerAllowList {
    fn name(&self) -> &'static str {
        "borrower_allow_list"
    }

    fn approve(&self, terms: &LoanTerms, state: &FundState) -> bool {
        has_cash_for(terms, state) && self.borrowers.contains(&terms.borrower)
    }
}

/// Refuse any single loan above `max_share` of the fund's total assets.
#[derive(Debug)]
pub struct ConcentrationLimit {
    max_share: Decimal,
}

impl DelegatePolicy for ConcentrationLimit {
    fn name(&self) -> &'static str {
        "concentration_limit"
    }

    fn approve(&self, terms: &LoanTerms, state: &FundState) -> bool {
        let Some(cap) = state.total_assets.checked_mul(self.max_share) else {
            return false;
        };
        has_cash_for(terms, state) && terms.principal <= cap
    }
}

#[derive(Debug)]
pub struct AllOf {
    policies: Vec<Box<dyn DelegatePolicy>>,
}

impl DelegatePolicy for AllOf {
    fn name(&self) -> &'static str {
        "all_of"
    }

    fn approve(&self, terms: &LoanTerms, state: &FundState) -> bool {
        has_cash_for(terms, state) && self.policies.iter().all(|p| p.approve(terms, state))
    }
}

/// Instantiate the policy a fund record is configured with.
pub fn build_policy(config: &PolicyConfig) -> Result<Box<dyn DelegatePolicy>, LendingError> {
    Ok(match config {
        PolicyConfig::WhitelistAll => Box::new(WhitelistAll),
        PolicyConfig::BorrowerAllowList { borrowers } => Box::new(BorrowerAllowList {
            borrowers: borrowers.iter().cloned().collect(),
        }),
        PolicyConfig::ConcentrationLimit { max_share } => {
            if *max_share <= Decimal::ZERO || *max_share > Decimal::ONE {
                return Err(LendingError::OutOfBounds {
                    field: "max_share",
                    value: max_share.to_string(),
                });
            }
            Box::new(ConcentrationLimit {
                max_share: *max_share,
            })
        }
        PolicyConfig::AllOf { policies } => Box::new(AllOf {
            policies: policies
                .iter()
                .map(build_policy)
                .collect::<Result<Vec<_>, _>>()?,
        }),
    })
}
