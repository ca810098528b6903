//! Settlement asset.
//!
//! The core only needs an account-balance interface from the fungible asset
//! it settles in. [`TokenLedger`] is the in-service implementation used for
//! deposits, loan disbursement and repayment.

use crate::engine::access::{AccessControl, ModuleId};
use crate::engine::error::LendingError;
use crate::engine::fixed_point::validate_amount;
use crate::models::{AssetBalance, Grant};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Account-balance view of an external fungible asset.
pub trait AssetLedger {
    fn balance_of(&self, account: &str) -> Decimal;

    /// Move `amount` from `src` to `dst`. Returns `false`, changing nothing,
    /// when the move cannot complete or `src` and `dst` are the same account.
    fn transfer_from(&mut self, src: &str, dst: &str, amount: Decimal) -> bool;
}

#[derive(Debug, Clone)]
pub struct TokenLedger {
    access: AccessControl,
    balances: BTreeMap<String, Decimal>,
}

impl TokenLedger {
    pub fn new(deployer: &str) -> Self {
        Self {
            access: AccessControl::new(ModuleId::Asset, deployer),
            balances: BTreeMap::new(),
        }
    }

    pub fn restore(grants: &[Grant], balances: Vec<AssetBalance>) -> Self {
        Self {
            access: AccessControl::restore(ModuleId::Asset, grants),
            balances: balances
                .into_iter()
                .map(|b| (b.account, b.balance))
                .collect(),
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut AccessControl {
        &mut self.access
    }

    /// Issue new tokens to `to`.
    pub fn mint(&mut self, caller: &str, to: &str, amount: Decimal) -> Result<Decimal, LendingError> {
        self.access.require_permitted(caller)?;
        let amount = validate_amount(amount)?;
        let balance = self.balances.entry(to.to_string()).or_insert(Decimal::ZERO);
        *balance = balance
            .checked_add(amount)
            .ok_or(LendingError::ArithmeticOverflow("minting"))?;
        Ok(*balance)
    }

    pub fn record(&self, account: &str) -> AssetBalance {
        AssetBalance {
            account: account.to_string(),
            balance: self.balance_of(account),
        }
    }

    pub fn records(&self) -> Vec<AssetBalance> {
        self.balances
            .iter()
            .map(|(account, balance)| AssetBalance {
                account: account.clone(),
                balance: *balance,
            })
            .collect()
    }
}

impl AssetLedger for TokenLedger {
    fn balance_of(&self, account: &str) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    fn transfer_from(&mut self, src: &str, dst: &str, amount: Decimal) -> bool {
        if src == dst || amount <= Decimal::ZERO || self.balance_of(src) < amount {
            return false;
        }
        let Some(credited) = self.balance_of(dst).checked_add(amount) else {
            return false;
        };
        self.balances
            .insert(src.to_string(), self.balance_of(src) - amount);
        self.balances.insert(dst.to_string(), credited);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minting_is_privileged() {
        let mut ledger = TokenLedger::new("deployer");
        assert!(matches!(
            ledger.mint("alice", "alice", Decimal::from(10)),
            Err(LendingError::Unauthorized { .. })
        ));
        assert_eq!(ledger.mint("deployer", "alice", Decimal::from(10)), Ok(Decimal::from(10)));
        assert_eq!(ledger.balance_of("alice"), Decimal::from(10));
        assert!(ledger.mint("deployer", "alice", Decimal::new(5, 1)).is_err());
    }

    #[test]
    fn transfers_never_overdraw() {
        let mut ledger = TokenLedger::new("deployer");
        ledger.mint("deployer", "alice", Decimal::from(100)).unwrap();

        assert!(ledger.transfer_from("alice", "bob", Decimal::from(60)));
        assert!(!ledger.transfer_from("alice", "bob", Decimal::from(41)));
        assert!(!ledger.transfer_from("alice", "bob", Decimal::ZERO));
        assert_eq!(ledger.balance_of("alice"), Decimal::from(40));
        assert_eq!(ledger.balance_of("bob"), Decimal::from(60));

        assert!(!ledger.transfer_from("bob", "bob", Decimal::from(60)));
        assert_eq!(ledger.balance_of("bob"), Decimal::from(60));
    }

    #[test]
    fn records_round_trip_through_restore() {
        let mut ledger = TokenLedger::new("deployer");
        ledger.mint("deployer", "alice", Decimal::from(7)).unwrap();
        let restored = TokenLedger::restore(&ledger.access().records(), ledger.records());
        assert_eq!(restored.balance_of("alice"), Decimal::from(7));
        assert!(restored.access().is_permitted("deployer"));
        assert_eq!(ledger.record("nobody").balance, Decimal::ZERO);
    }
}
