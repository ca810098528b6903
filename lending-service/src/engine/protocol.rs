//! Composition root of the lending engine.
//!
//! [`Protocol`] wires the settlement ledger, pile, origination registry and
//! funds together and performs the operations that span several of them
//! (funding with disbursement, repayment with cash return). Every method runs
//! to completion synchronously; callers serialize access to one instance.
//!
//! Each successful mutation marks the records it touched. The service layer
//! drains them with [`Protocol::take_changes`] and persists them before the
//! next operation runs.

use crate::engine::access::{AccessControl, ModuleId};
use crate::engine::asset::{AssetLedger, TokenLedger};
use crate::engine::clock::Clock;
use crate::engine::error::LendingError;
use crate::engine::fund::{is_fund_identity, AutoInvestOutcome, Fund, Settlement};
use crate::engine::origination::{LoanRegistry, ORIGINATION_IDENTITY};
use crate::engine::pile::Pile;
use crate::models::{
    BucketId, FundRecord, Holding, Loan, LoanBounds, LoanId, PolicyConfig, RateBucket,
    ShareBalance, StateSnapshot,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Keys of records modified since the last drain.
#[derive(Debug, Default)]
struct ChangeSet {
    origination: bool,
    grants: BTreeSet<(ModuleId, String)>,
    buckets: BTreeSet<BucketId>,
    loans: BTreeSet<LoanId>,
    funds: BTreeSet<String>,
    shares: BTreeSet<(String, String)>,
    holdings: BTreeSet<(String, LoanId)>,
    accounts: BTreeSet<String>,
}

pub struct Protocol {
    clock: Arc<dyn Clock>,
    asset: TokenLedger,
    pile: Pile,
    origination: LoanRegistry,
    funds: BTreeMap<String, Fund>,
    changes: ChangeSet,
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("buckets", &self.pile.buckets().count())
            .field("next_loan_id", &self.origination.next_loan_id())
            .field("funds", &self.funds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Protocol {
    /// Fresh deployment administered by `deployer`.
    ///
    /// The registry is connected to the pile so it can snapshot chi when a
    /// loan is funded.
    pub fn deploy(deployer: &str, clock: Arc<dyn Clock>) -> Result<Self, LendingError> {
        let mut pile = Pile::new(deployer);
        pile.access_mut().grant(deployer, ORIGINATION_IDENTITY)?;

        let mut protocol = Self {
            clock,
            asset: TokenLedger::new(deployer),
            pile,
            origination: LoanRegistry::new(deployer),
            funds: BTreeMap::new(),
            changes: ChangeSet::default(),
        };
        protocol.changes.origination = true;
        for module in [ModuleId::Asset, ModuleId::Pile, ModuleId::Origination] {
            let grantees: Vec<String> = protocol
                .acl(&module)?
                .records()
                .into_iter()
                .map(|g| g.grantee)
                .collect();
            for grantee in grantees {
                protocol.changes.grants.insert((module.clone(), grantee));
            }
        }
        Ok(protocol)
    }

    /// Rebuild the engine from persisted state.
    pub fn restore(snapshot: StateSnapshot, clock: Arc<dyn Clock>) -> Result<Self, LendingError> {
        let StateSnapshot {
            origination,
            grants,
            buckets,
            loans,
            funds,
            shares,
            holdings,
            balances,
            ..
        } = snapshot;

        let mut shares_by_fund: BTreeMap<String, Vec<ShareBalance>> = BTreeMap::new();
        for share in shares {
            shares_by_fund.entry(share.symbol.clone()).or_default().push(share);
        }
        let mut holdings_by_fund: BTreeMap<String, Vec<Holding>> = BTreeMap::new();
        for holding in holdings {
            holdings_by_fund
                .entry(holding.symbol.clone())
                .or_default()
                .push(holding);
        }

        let mut restored_funds = BTreeMap::new();
        for record in funds {
            let symbol = record.symbol.clone();
            let fund = Fund::restore(
                record,
                &grants,
                shares_by_fund.remove(&symbol).unwrap_or_default(),
                holdings_by_fund.remove(&symbol).unwrap_or_default(),
            )?;
            restored_funds.insert(symbol, fund);
        }

        Ok(Self {
            clock,
            asset: TokenLedger::restore(&grants, balances),
            pile: Pile::restore(&grants, buckets),
            origination: LoanRegistry::restore(&grants, origination, loans),
            funds: restored_funds,
            changes: ChangeSet::default(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ---------------------------------------------------------------------
    // Authorization
    // ---------------------------------------------------------------------

    fn acl(&self, module: &ModuleId) -> Result<&AccessControl, LendingError> {
        match module {
            ModuleId::Asset => Ok(self.asset.access()),
            ModuleId::Pile => Ok(self.pile.access()),
            ModuleId::Origination => Ok(self.origination.access()),
            ModuleId::Fund(symbol) => Ok(self.fund(symbol)?.access()),
        }
    }

    fn acl_mut(&mut self, module: &ModuleId) -> Result<&mut AccessControl, LendingError> {
        match module {
            ModuleId::Asset => Ok(self.asset.access_mut()),
            ModuleId::Pile => Ok(self.pile.access_mut()),
            ModuleId::Origination => Ok(self.origination.access_mut()),
            ModuleId::Fund(symbol) => Ok(self.fund_mut(symbol)?.access_mut()),
        }
    }

    pub fn is_permitted(&self, module: &ModuleId, identity: &str) -> Result<bool, LendingError> {
        Ok(self.acl(module)?.is_permitted(identity))
    }

    pub fn require_permitted(&self, module: &ModuleId, caller: &str) -> Result<(), LendingError> {
        self.acl(module)?.require_permitted(caller)
    }

    /// Returns whether the grant changed.
    pub fn grant(
        &mut self,
        caller: &str,
        module: &ModuleId,
        grantee: &str,
    ) -> Result<bool, LendingError> {
        let changed = self.acl_mut(module)?.grant(caller, grantee)?;
        if changed {
            self.changes
                .grants
                .insert((module.clone(), grantee.to_string()));
        }
        Ok(changed)
    }

    /// Returns whether the grant changed.
    pub fn revoke(
        &mut self,
        caller: &str,
        module: &ModuleId,
        grantee: &str,
    ) -> Result<bool, LendingError> {
        let changed = self.acl_mut(module)?.revoke(caller, grantee)?;
        if changed {
            self.changes
                .grants
                .insert((module.clone(), grantee.to_string()));
        }
        Ok(changed)
    }

    // ---------------------------------------------------------------------
    // Settlement asset
    // ---------------------------------------------------------------------

    pub fn mint(&mut self, caller: &str, to: &str, amount: Decimal) -> Result<Decimal, LendingError> {
        let balance = self.asset.mint(caller, to, amount)?;
        self.changes.accounts.insert(to.to_string());
        Ok(balance)
    }

    pub fn balance_of(&self, account: &str) -> Decimal {
        self.asset.balance_of(account)
    }

    fn transfer(&mut self, from: &str, to: &str, amount: Decimal) -> Result<(), LendingError> {
        if !self.asset.transfer_from(from, to, amount) {
            return Err(LendingError::TransferFailed {
                from: from.to_string(),
                to: to.to_string(),
                amount,
            });
        }
        self.changes.accounts.insert(from.to_string());
        self.changes.accounts.insert(to.to_string());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Interest accrual
    // ---------------------------------------------------------------------

    pub fn create_bucket(
        &mut self,
        caller: &str,
        rate_per_second: Decimal,
    ) -> Result<BucketId, LendingError> {
        let now = self.now();
        let bucket_id = self.pile.create_bucket(caller, rate_per_second, now)?;
        self.changes.buckets.insert(bucket_id);
        Ok(bucket_id)
    }

    pub fn bucket(&self, bucket_id: BucketId) -> Result<&RateBucket, LendingError> {
        self.pile.bucket(bucket_id)
    }

    /// Chi the bucket would report if dripped now.
    pub fn current_chi(&self, bucket_id: BucketId) -> Result<Decimal, LendingError> {
        self.pile.chi_at(bucket_id, self.now())
    }

    pub fn drip(&mut self, bucket_id: BucketId) -> Result<Decimal, LendingError> {
        let now = self.now();
        let chi = self.pile.drip(bucket_id, now)?;
        self.changes.buckets.insert(bucket_id);
        Ok(chi)
    }

    // ---------------------------------------------------------------------
    // Origination
    // ---------------------------------------------------------------------

    pub fn bounds(&self) -> &LoanBounds {
        self.origination.bounds()
    }

    pub fn set_bounds(&mut self, caller: &str, bounds: LoanBounds) -> Result<(), LendingError> {
        self.origination.set_bounds(caller, bounds)?;
        self.changes.origination = true;
        Ok(())
    }

    pub fn request_loan(
        &mut self,
        borrower: &str,
        principal: Decimal,
        duration_secs: i64,
        bucket_id: BucketId,
    ) -> Result<LoanId, LendingError> {
        if is_fund_identity(borrower) {
            return Err(LendingError::ReservedAccount(borrower.to_string()));
        }
        let now = self.now();
        let loan_id = self.origination.request_loan(
            &self.pile,
            borrower,
            principal,
            duration_secs,
            bucket_id,
            now,
        )?;
        self.changes.origination = true;
        self.changes.loans.insert(loan_id);
        Ok(loan_id)
    }

    pub fn loan(&self, loan_id: LoanId) -> Result<&Loan, LendingError> {
        self.origination.loan(loan_id)
    }

    /// Requested loan ids, computed from current state on each call.
    pub fn list_requested_loans(&self) -> impl Iterator<Item = LoanId> + '_ {
        self.origination.list_requested()
    }

    pub fn next_loan_id(&self) -> LoanId {
        self.origination.next_loan_id()
    }

    fn touch_loan(&mut self, loan_id: LoanId) {
        self.changes.loans.insert(loan_id);
        if let Ok(loan) = self.origination.loan(loan_id) {
            self.changes.buckets.insert(loan.bucket_id);
        }
    }

    /// Fund a loan directly from `funder`'s token account.
    ///
    /// Funds do not come through here: their cash is tracked by the fund
    /// ledger and moves only through [`Protocol::invest`].
    pub fn fund_loan(&mut self, funder: &str, loan_id: LoanId) -> Result<&Loan, LendingError> {
        if is_fund_identity(funder) {
            return Err(LendingError::Unauthorized {
                module: ModuleId::Origination,
                caller: funder.to_string(),
            });
        }
        let now = self.now();
        let terms = self.origination.check_fundable(loan_id, funder)?.terms();

        self.transfer(funder, &terms.borrower, terms.principal)?;
        let funded = self
            .origination
            .fund_loan(&mut self.pile, loan_id, funder, now)
            .map(|_| ());
        if let Err(e) = funded {
            self.transfer(&terms.borrower, funder, terms.principal)?;
            return Err(e);
        }

        self.touch_loan(loan_id);
        self.origination.loan(loan_id)
    }

    /// Current debt, dripping the loan's bucket first.
    pub fn debt_of(&mut self, loan_id: LoanId) -> Result<Option<Decimal>, LendingError> {
        let now = self.now();
        let debt = self.origination.debt(&mut self.pile, loan_id, now)?;
        self.changes.buckets.insert(self.origination.loan(loan_id)?.bucket_id);
        Ok(debt)
    }

    /// Repay a loan in full from `payer`'s account; the cash goes to whoever
    /// funded it.
    pub fn repay(
        &mut self,
        payer: &str,
        loan_id: LoanId,
        amount: Decimal,
    ) -> Result<&Loan, LendingError> {
        if is_fund_identity(payer) {
            return Err(LendingError::ReservedAccount(payer.to_string()));
        }
        let now = self.now();
        let debt = self
            .origination
            .check_repayment(&self.pile, loan_id, amount, now)?;
        let funder = self
            .origination
            .loan(loan_id)?
            .funded_by
            .clone()
            .ok_or_else(|| LendingError::invalid_state(loan_id, "funded loan has no funder"))?;

        self.transfer(payer, &funder, debt)?;
        let repaid = self
            .origination
            .repay(&mut self.pile, loan_id, amount, now)
            .map(|_| ());
        if let Err(e) = repaid {
            self.transfer(&funder, payer, debt)?;
            return Err(e);
        }

        self.touch_loan(loan_id);
        self.origination.loan(loan_id)
    }

    pub fn mark_default(&mut self, caller: &str, loan_id: LoanId) -> Result<&Loan, LendingError> {
        let now = self.now();
        self.origination.mark_default(caller, loan_id, now)?;
        self.changes.loans.insert(loan_id);
        self.origination.loan(loan_id)
    }

    // ---------------------------------------------------------------------
    // Funds
    // ---------------------------------------------------------------------

    pub fn fund(&self, symbol: &str) -> Result<&Fund, LendingError> {
        self.funds
            .get(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))
    }

    fn fund_mut(&mut self, symbol: &str) -> Result<&mut Fund, LendingError> {
        self.funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))
    }

    pub fn funds(&self) -> impl Iterator<Item = &Fund> + '_ {
        self.funds.values()
    }

    pub fn fund_symbols(&self) -> Vec<String> {
        self.funds.keys().cloned().collect()
    }

    /// Open a fund administered by `caller`.
    ///
    /// The fund still needs a grant on the origination registry before it
    /// can fund loans.
    pub fn create_fund(
        &mut self,
        caller: &str,
        symbol: &str,
        policy: PolicyConfig,
    ) -> Result<FundRecord, LendingError> {
        if self.funds.contains_key(symbol) {
            return Err(LendingError::FundExists(symbol.to_string()));
        }
        let fund = Fund::new(symbol, caller, policy, self.now())?;
        let record = fund.record();
        self.changes.funds.insert(symbol.to_string());
        self.changes
            .grants
            .insert((fund.access().module().clone(), caller.to_string()));
        self.funds.insert(symbol.to_string(), fund);
        Ok(record)
    }

    pub fn set_policy(
        &mut self,
        caller: &str,
        symbol: &str,
        policy: PolicyConfig,
    ) -> Result<(), LendingError> {
        self.fund_mut(symbol)?.set_policy(caller, policy)?;
        self.changes.funds.insert(symbol.to_string());
        Ok(())
    }

    /// Returns the shares minted.
    pub fn deposit(
        &mut self,
        depositor: &str,
        symbol: &str,
        amount: Decimal,
    ) -> Result<Decimal, LendingError> {
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let minted = fund.deposit(&mut self.asset, depositor, amount)?;
        let identity = fund.identity().to_string();

        self.changes.funds.insert(symbol.to_string());
        self.changes
            .shares
            .insert((symbol.to_string(), depositor.to_string()));
        self.changes.accounts.insert(depositor.to_string());
        self.changes.accounts.insert(identity);
        Ok(minted)
    }

    /// Returns the assets paid out.
    pub fn withdraw(
        &mut self,
        depositor: &str,
        symbol: &str,
        shares: Decimal,
    ) -> Result<Decimal, LendingError> {
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let payout = fund.withdraw(&mut self.asset, depositor, shares)?;
        let identity = fund.identity().to_string();

        self.changes.funds.insert(symbol.to_string());
        self.changes
            .shares
            .insert((symbol.to_string(), depositor.to_string()));
        self.changes.accounts.insert(depositor.to_string());
        self.changes.accounts.insert(identity);
        Ok(payout)
    }

    pub fn consider_request(&self, symbol: &str, loan_id: LoanId) -> Result<bool, LendingError> {
        self.fund(symbol)?.consider(&self.origination, loan_id)
    }

    fn touch_funding(&mut self, symbol: &str, loan_id: LoanId) {
        self.touch_loan(loan_id);
        self.changes.funds.insert(symbol.to_string());
        self.changes
            .holdings
            .insert((symbol.to_string(), loan_id));
        if let Ok(loan) = self.origination.loan(loan_id) {
            self.changes.accounts.insert(loan.borrower.clone());
        }
        if let Some(fund) = self.funds.get(symbol) {
            self.changes.accounts.insert(fund.identity().to_string());
        }
    }

    /// Fund `loan_id` from the fund's free cash. Returns the principal lent.
    pub fn invest(&mut self, symbol: &str, loan_id: LoanId) -> Result<Decimal, LendingError> {
        let now = self.now();
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let principal = fund.invest(
            &mut self.asset,
            &mut self.origination,
            &mut self.pile,
            loan_id,
            now,
        )?;
        self.touch_funding(symbol, loan_id);
        Ok(principal)
    }

    /// One auto-invest step for the fund.
    pub fn auto_invest(&mut self, symbol: &str) -> Result<AutoInvestOutcome, LendingError> {
        let now = self.now();
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let cursor = fund.auto_invest_cursor();
        let outcome = fund.auto_invest(&mut self.asset, &mut self.origination, &mut self.pile, now);

        if fund.auto_invest_cursor() != cursor {
            self.changes.funds.insert(symbol.to_string());
        }
        if let AutoInvestOutcome::Funded { loan_id } = outcome {
            self.touch_funding(symbol, loan_id);
        }
        Ok(outcome)
    }

    fn touch_settlement(&mut self, symbol: &str, settlement: &Settlement) {
        self.changes.funds.insert(symbol.to_string());
        self.changes
            .holdings
            .insert((symbol.to_string(), settlement.loan_id));
    }

    /// Settle a held loan according to its terminal status.
    pub fn settle(&mut self, symbol: &str, loan_id: LoanId) -> Result<Settlement, LendingError> {
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let settlement = fund.settle(&self.origination, loan_id)?;
        self.touch_settlement(symbol, &settlement);
        Ok(settlement)
    }

    pub fn settle_repayment(
        &mut self,
        symbol: &str,
        loan_id: LoanId,
    ) -> Result<Settlement, LendingError> {
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let settlement = fund.settle_repayment(&self.origination, loan_id)?;
        self.touch_settlement(symbol, &settlement);
        Ok(settlement)
    }

    pub fn settle_default(
        &mut self,
        symbol: &str,
        loan_id: LoanId,
    ) -> Result<Settlement, LendingError> {
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let settlement = fund.settle_default(&self.origination, loan_id)?;
        self.touch_settlement(symbol, &settlement);
        Ok(settlement)
    }

    /// Settle every closed loan the fund still holds.
    pub fn sweep(&mut self, symbol: &str) -> Result<Vec<Settlement>, LendingError> {
        let fund = self
            .funds
            .get_mut(symbol)
            .ok_or_else(|| LendingError::UnknownFund(symbol.to_string()))?;
        let settlements = fund.sweep(&self.origination);
        for settlement in &settlements {
            self.touch_settlement(symbol, settlement);
        }
        Ok(settlements)
    }

    /// Whether every fund's ledger identities hold and its free cash is
    /// backed by tokens in its account.
    pub fn check_invariants(&self) -> bool {
        self.funds
            .values()
            .all(|fund| fund.check_invariants() && fund.is_backed_by(&self.asset))
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    pub fn has_changes(&self) -> bool {
        let c = &self.changes;
        c.origination
            || !c.grants.is_empty()
            || !c.buckets.is_empty()
            || !c.loans.is_empty()
            || !c.funds.is_empty()
            || !c.shares.is_empty()
            || !c.holdings.is_empty()
            || !c.accounts.is_empty()
            || self.pile.has_dripped()
    }

    /// Drop pending change marks without producing a snapshot.
    pub fn discard_changes(&mut self) {
        self.changes = ChangeSet::default();
        self.pile.take_dripped();
    }

    /// Drain the touched records into a snapshot for the store.
    pub fn take_changes(&mut self) -> StateSnapshot {
        let mut changes = std::mem::take(&mut self.changes);
        changes.buckets.extend(self.pile.take_dripped());
        let mut snapshot = StateSnapshot {
            origination: changes.origination.then(|| self.origination.config()),
            ..StateSnapshot::default()
        };

        for (module, grantee) in &changes.grants {
            if let Some(grant) = self.acl(module).ok().and_then(|acl| acl.record(grantee)) {
                snapshot.grants.push(grant);
            }
        }
        snapshot.buckets = changes
            .buckets
            .iter()
            .filter_map(|id| self.pile.bucket(*id).ok().cloned())
            .collect();
        snapshot.loans = changes
            .loans
            .iter()
            .filter_map(|id| self.origination.loan(*id).ok().cloned())
            .collect();
        snapshot.funds = changes
            .funds
            .iter()
            .filter_map(|symbol| self.funds.get(symbol).map(Fund::record))
            .collect();
        snapshot.shares = changes
            .shares
            .iter()
            .filter_map(|(symbol, holder)| self.funds.get(symbol).map(|f| f.share_record(holder)))
            .collect();
        for (symbol, loan_id) in changes.holdings {
            match self.funds.get(&symbol).and_then(|f| f.holding_record(loan_id)) {
                Some(holding) => snapshot.holdings.push(holding),
                None => snapshot.released_holdings.push((symbol, loan_id)),
            }
        }
        snapshot.balances = changes
            .accounts
            .iter()
            .map(|account| self.asset.record(account))
            .collect();
        snapshot
    }

    /// Every record the engine holds.
    pub fn full_snapshot(&self) -> StateSnapshot {
        let mut grants = self.asset.access().records();
        grants.extend(self.pile.access().records());
        grants.extend(self.origination.access().records());
        for fund in self.funds.values() {
            grants.extend(fund.access().records());
        }

        StateSnapshot {
            origination: Some(self.origination.config()),
            grants,
            buckets: self.pile.buckets().cloned().collect(),
            loans: self.origination.loans().cloned().collect(),
            funds: self.funds.values().map(Fund::record).collect(),
            shares: self.funds.values().flat_map(Fund::share_records).collect(),
            holdings: self.funds.values().flat_map(Fund::holding_records).collect(),
            released_holdings: Vec::new(),
            balances: self.asset.records(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::models::LoanStatus;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn deployed() -> (Arc<ManualClock>, Protocol) {
        let clock = Arc::new(ManualClock::at(1_700_000_000));
        let protocol = Protocol::deploy("deployer", clock.clone()).unwrap();
        (clock, protocol)
    }

    #[test]
    fn deploy_connects_the_registry_to_the_pile() {
        let (_, mut protocol) = deployed();
        assert_eq!(
            protocol.is_permitted(&ModuleId::Pile, ORIGINATION_IDENTITY),
            Ok(true)
        );
        let snapshot = protocol.take_changes();
        assert!(snapshot.origination.is_some());
        assert_eq!(snapshot.grants.len(), 4);
        assert!(!protocol.has_changes());
    }

    #[test]
    fn direct_funding_disburses_and_repayment_returns_cash() {
        let (clock, mut protocol) = deployed();
        protocol.mint("deployer", "lender", dec("1000")).unwrap();
        protocol.mint("deployer", "bob", dec("100")).unwrap();
        protocol
            .grant("deployer", &ModuleId::Origination, "lender")
            .unwrap();
        let bucket = protocol.create_bucket("deployer", dec("1.1")).unwrap();
        let loan_id = protocol
            .request_loan("bob", dec("500"), 3_600, bucket)
            .unwrap();
        protocol.take_changes();

        protocol.fund_loan("lender", loan_id).unwrap();
        assert_eq!(protocol.balance_of("lender"), dec("500"));
        assert_eq!(protocol.balance_of("bob"), dec("600"));

        let changes = protocol.take_changes();
        assert_eq!(changes.loans.len(), 1);
        assert_eq!(changes.balances.len(), 2);

        clock.advance(1);
        assert_eq!(protocol.debt_of(loan_id), Ok(Some(dec("550"))));
        protocol.repay("bob", loan_id, dec("550")).unwrap();
        assert_eq!(protocol.balance_of("lender"), dec("1050"));
        assert_eq!(protocol.balance_of("bob"), dec("50"));
        assert_eq!(protocol.loan(loan_id).unwrap().status, LoanStatus::Repaid);
    }

    #[test]
    fn failed_funding_leaves_balances_untouched() {
        let (_, mut protocol) = deployed();
        protocol
            .grant("deployer", &ModuleId::Origination, "lender")
            .unwrap();
        let bucket = protocol.create_bucket("deployer", dec("1.1")).unwrap();
        let loan_id = protocol
            .request_loan("bob", dec("500"), 3_600, bucket)
            .unwrap();
        protocol.take_changes();

        assert!(matches!(
            protocol.fund_loan("lender", loan_id),
            Err(LendingError::TransferFailed { .. })
        ));
        assert_eq!(
            protocol.loan(loan_id).unwrap().status,
            LoanStatus::Requested
        );
        assert!(!protocol.has_changes());
    }

    #[test]
    fn repayment_requires_the_payer_to_hold_the_debt() {
        let (_, mut protocol) = deployed();
        protocol.mint("deployer", "lender", dec("500")).unwrap();
        protocol
            .grant("deployer", &ModuleId::Origination, "lender")
            .unwrap();
        let bucket = protocol.create_bucket("deployer", Decimal::ONE).unwrap();
        let loan_id = protocol
            .request_loan("bob", dec("500"), 3_600, bucket)
            .unwrap();
        protocol.fund_loan("lender", loan_id).unwrap();
        assert!(protocol.transfer("bob", "elsewhere", dec("1")).is_ok());

        assert!(matches!(
            protocol.repay("bob", loan_id, dec("500")),
            Err(LendingError::TransferFailed { .. })
        ));
        assert_eq!(protocol.loan(loan_id).unwrap().status, LoanStatus::Funded);
    }

    #[test]
    fn fund_identities_cannot_bypass_their_ledger() {
        let (_, mut protocol) = deployed();
        protocol
            .create_fund("deployer", "TST", PolicyConfig::WhitelistAll)
            .unwrap();
        protocol
            .grant("deployer", &ModuleId::Origination, "fund:TST")
            .unwrap();
        let bucket = protocol.create_bucket("deployer", Decimal::ONE).unwrap();
        let loan_id = protocol.request_loan("bob", dec("5"), 60, bucket).unwrap();
        assert!(matches!(
            protocol.fund_loan("fund:TST", loan_id),
            Err(LendingError::Unauthorized { .. })
        ));
        assert!(matches!(
            protocol.fund_loan("fund:LATER", loan_id),
            Err(LendingError::Unauthorized { .. })
        ));

        protocol.mint("deployer", "fund:TST", dec("50")).unwrap();
        assert_eq!(
            protocol.request_loan("fund:TST", dec("5"), 60, bucket),
            Err(LendingError::ReservedAccount("fund:TST".to_string()))
        );
        assert_eq!(
            protocol.repay("fund:TST", loan_id, dec("5")),
            Err(LendingError::ReservedAccount("fund:TST".to_string()))
        );
        assert_eq!(
            protocol.deposit("fund:TST", "TST", dec("50")),
            Err(LendingError::ReservedAccount("fund:TST".to_string()))
        );
        assert_eq!(protocol.next_loan_id(), loan_id + 1);
        assert_eq!(protocol.fund("TST").unwrap().state().total_assets, Decimal::ZERO);
        assert!(protocol.check_invariants());
    }

    #[test]
    fn idle_auto_invest_leaves_nothing_to_persist() {
        let (_, mut protocol) = deployed();
        protocol
            .create_fund("deployer", "TST", PolicyConfig::WhitelistAll)
            .unwrap();
        let bucket = protocol.create_bucket("deployer", Decimal::ONE).unwrap();
        protocol.take_changes();

        assert_eq!(protocol.auto_invest("TST"), Ok(AutoInvestOutcome::Idle));
        assert!(!protocol.has_changes());

        let loan_id = protocol.request_loan("bob", dec("5"), 60, bucket).unwrap();
        protocol.take_changes();
        assert_eq!(
            protocol.auto_invest("TST"),
            Ok(AutoInvestOutcome::Declined { loan_id })
        );
        assert_eq!(protocol.take_changes().funds.len(), 1);
        assert_eq!(protocol.auto_invest("TST"), Ok(AutoInvestOutcome::Idle));
        assert_eq!(protocol.take_changes().funds.len(), 1);
        assert_eq!(protocol.fund("TST").unwrap().auto_invest_cursor(), 0);
    }

    #[test]
    fn funds_are_unique_per_symbol() {
        let (_, mut protocol) = deployed();
        protocol
            .create_fund("alice", "TST", PolicyConfig::WhitelistAll)
            .unwrap();
        assert_eq!(
            protocol.create_fund("bob", "TST", PolicyConfig::WhitelistAll),
            Err(LendingError::FundExists("TST".to_string()))
        );
        assert_eq!(
            protocol.is_permitted(&ModuleId::Fund("TST".to_string()), "alice"),
            Ok(true)
        );
        assert!(matches!(
            protocol.deposit("alice", "NOPE", dec("1")),
            Err(LendingError::UnknownFund(_))
        ));
    }

    #[test]
    fn settled_holdings_are_released_in_the_change_set() {
        let (_, mut protocol) = deployed();
        protocol.mint("deployer", "alice", dec("100")).unwrap();
        protocol.mint("deployer", "bob", dec("10")).unwrap();
        protocol
            .create_fund("deployer", "TST", PolicyConfig::WhitelistAll)
            .unwrap();
        protocol
            .grant("deployer", &ModuleId::Origination, "fund:TST")
            .unwrap();
        let bucket = protocol.create_bucket("deployer", Decimal::ONE).unwrap();
        let loan_id = protocol.request_loan("bob", dec("50"), 60, bucket).unwrap();
        protocol.deposit("alice", "TST", dec("100")).unwrap();
        assert_eq!(
            protocol.auto_invest("TST"),
            Ok(AutoInvestOutcome::Funded { loan_id })
        );
        protocol.repay("bob", loan_id, dec("50")).unwrap();
        assert_eq!(protocol.balance_of("fund:TST"), dec("100"));
        protocol.take_changes();

        let settled = protocol.sweep("TST").unwrap();
        assert_eq!(settled.len(), 1);
        let changes = protocol.take_changes();
        assert_eq!(changes.released_holdings, vec![("TST".to_string(), loan_id)]);
        assert!(protocol.check_invariants());
    }

    #[test]
    fn restore_reproduces_the_engine() {
        let (clock, mut protocol) = deployed();
        protocol.mint("deployer", "alice", dec("100")).unwrap();
        protocol
            .create_fund("deployer", "TST", PolicyConfig::WhitelistAll)
            .unwrap();
        protocol
            .grant("deployer", &ModuleId::Origination, "fund:TST")
            .unwrap();
        let bucket = protocol.create_bucket("deployer", dec("1.01")).unwrap();
        let loan_id = protocol.request_loan("bob", dec("40"), 60, bucket).unwrap();
        protocol.deposit("alice", "TST", dec("100")).unwrap();
        protocol.invest("TST", loan_id).unwrap();

        let restored = Protocol::restore(protocol.full_snapshot(), clock).unwrap();
        assert_eq!(restored.full_snapshot(), protocol.full_snapshot());
        assert_eq!(restored.next_loan_id(), 2);
        assert_eq!(restored.fund("TST").unwrap().state(), protocol.fund("TST").unwrap().state());
    }
}
