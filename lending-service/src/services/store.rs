//! Persistence seam for engine state.

use crate::models::{
    AssetBalance, BucketId, FundRecord, Grant, Holding, Loan, LoanId, OriginationConfig,
    RateBucket, ShareBalance, StateSnapshot,
};
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Durable home of the engine's records.
///
/// `persist` must apply a snapshot atomically: either every record in it is
/// written or none is.
#[async_trait]
pub trait LendingStore: Send + Sync {
    /// Everything persisted so far, or `None` for an empty store.
    async fn load(&self) -> Result<Option<StateSnapshot>, AppError>;

    async fn persist(&self, changes: &StateSnapshot) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[derive(Debug, Default)]
struct Tables {
    origination: Option<OriginationConfig>,
    grants: BTreeMap<(String, String), Grant>,
    buckets: BTreeMap<BucketId, RateBucket>,
    loans: BTreeMap<LoanId, Loan>,
    funds: BTreeMap<String, FundRecord>,
    shares: BTreeMap<(String, String), ShareBalance>,
    holdings: BTreeMap<(String, LoanId), Holding>,
    balances: BTreeMap<String, AssetBalance>,
}

impl Tables {
    fn apply(&mut self, changes: &StateSnapshot) {
        if let Some(config) = &changes.origination {
            self.origination = Some(config.clone());
        }
        for grant in &changes.grants {
            self.grants.insert(
                (grant.module.clone(), grant.grantee.clone()),
                grant.clone(),
            );
        }
        for bucket in &changes.buckets {
            self.buckets.insert(bucket.bucket_id, bucket.clone());
        }
        for loan in &changes.loans {
            self.loans.insert(loan.loan_id, loan.clone());
        }
        for fund in &changes.funds {
            self.funds.insert(fund.symbol.clone(), fund.clone());
        }
        for share in &changes.shares {
            self.shares
                .insert((share.symbol.clone(), share.holder.clone()), share.clone());
        }
        for holding in &changes.holdings {
            self.holdings
                .insert((holding.symbol.clone(), holding.loan_id), holding.clone());
        }
        for key in &changes.released_holdings {
            self.holdings.remove(key);
        }
        for balance in &changes.balances {
            self.balances.insert(balance.account.clone(), balance.clone());
        }
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            origination: self.origination.clone(),
            grants: self.grants.values().cloned().collect(),
            buckets: self.buckets.values().cloned().collect(),
            loans: self.loans.values().cloned().collect(),
            funds: self.funds.values().cloned().collect(),
            shares: self.shares.values().cloned().collect(),
            holdings: self.holdings.values().cloned().collect(),
            released_holdings: Vec::new(),
            balances: self.balances.values().cloned().collect(),
        }
    }
}

/// Process-local store for tests and throwaway deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `persist` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("In-memory store poisoned")))
    }
}

#[async_trait]
impl LendingStore for InMemoryStore {
    async fn load(&self) -> Result<Option<StateSnapshot>, AppError> {
        let snapshot = self.lock()?.snapshot();
        Ok((!snapshot.is_empty()).then_some(snapshot))
    }

    async fn persist(&self, changes: &StateSnapshot) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "In-memory store rejected the write"
            )));
        }
        self.lock()?.apply(changes);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn balance(account: &str, amount: i64) -> AssetBalance {
        AssetBalance {
            account: account.to_string(),
            balance: Decimal::from(amount),
        }
    }

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let store = InMemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_upsert_by_key() {
        let store = InMemoryStore::new();
        let mut changes = StateSnapshot::default();
        changes.balances.push(balance("alice", 10));
        store.persist(&changes).await.unwrap();

        changes.balances = vec![balance("alice", 4), balance("bob", 6)];
        store.persist(&changes).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.balances, vec![balance("alice", 4), balance("bob", 6)]);
    }

    #[tokio::test]
    async fn released_holdings_are_deleted() {
        let store = InMemoryStore::new();
        let holding = Holding {
            symbol: "TST".to_string(),
            loan_id: 1,
            cost_basis: Decimal::from(50),
        };
        store
            .persist(&StateSnapshot {
                holdings: vec![holding],
                ..StateSnapshot::default()
            })
            .await
            .unwrap();
        store
            .persist(&StateSnapshot {
                released_holdings: vec![("TST".to_string(), 1)],
                balances: vec![balance("fund:TST", 50)],
                ..StateSnapshot::default()
            })
            .await
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.holdings.is_empty());
    }

    #[tokio::test]
    async fn failing_writes_change_nothing() {
        let store = InMemoryStore::new();
        store.set_fail_writes(true);
        let changes = StateSnapshot {
            balances: vec![balance("alice", 1)],
            ..StateSnapshot::default()
        };
        assert!(store.persist(&changes).await.is_err());
        assert!(store.load().await.unwrap().is_none());
    }
}
