//! Loan origination registry.
//!
//! Owns the authoritative state of every loan and its lifecycle:
//!
//! ```text
//! Requested --fund--> Funded --repay--> Repaid
//!                            --default--> Defaulted
//! ```
//!
//! The registry never moves cash. Callers pair each transition with the
//! matching transfer inside the same serialized step.

use crate::engine::access::{AccessControl, ModuleId};
use crate::engine::error::LendingError;
use crate::engine::fixed_point::validate_amount;
use crate::engine::pile::Pile;
use crate::models::{BucketId, Grant, Loan, LoanBounds, LoanId, LoanStatus, OriginationConfig};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Identity the registry uses when it calls into the pile.
pub const ORIGINATION_IDENTITY: &str = "origination";

#[derive(Debug, Clone)]
pub struct LoanRegistry {
    access: AccessControl,
    loans: BTreeMap<LoanId, Loan>,
    next_loan_id: LoanId,
    bounds: LoanBounds,
}

impl LoanRegistry {
    pub fn new(deployer: &str) -> Self {
        Self {
            access: AccessControl::new(ModuleId::Origination, deployer),
            loans: BTreeMap::new(),
            next_loan_id: 1,
            bounds: LoanBounds::default(),
        }
    }

    pub fn restore(grants: &[Grant], config: Option<OriginationConfig>, loans: Vec<Loan>) -> Self {
        let loans: BTreeMap<LoanId, Loan> = loans.into_iter().map(|l| (l.loan_id, l)).collect();
        let highest = loans.keys().next_back().copied().unwrap_or(0);
        let (next_loan_id, bounds) = match config {
            Some(config) => (config.next_loan_id.max(highest + 1), config.bounds()),
            None => (highest + 1, LoanBounds::default()),
        };
        Self {
            access: AccessControl::restore(ModuleId::Origination, grants),
            loans,
            next_loan_id,
            bounds,
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut AccessControl {
        &mut self.access
    }

    pub fn config(&self) -> OriginationConfig {
        OriginationConfig::new(self.next_loan_id, &self.bounds)
    }

    pub fn bounds(&self) -> &LoanBounds {
        &self.bounds
    }

    pub fn set_bounds(&mut self, caller: &str, bounds: LoanBounds) -> Result<(), LendingError> {
        self.access.require_permitted(caller)?;

        validate_amount(bounds.min_principal)?;
        if let Some(max) = bounds.max_principal {
            validate_amount(max)?;
            if max < bounds.min_principal {
                return Err(LendingError::OutOfBounds {
                    field: "max_principal",
                    value: max.to_string(),
                });
            }
        }
        if bounds.min_duration_secs <= 0 {
            return Err(LendingError::OutOfBounds {
                field: "min_duration_secs",
                value: bounds.min_duration_secs.to_string(),
            });
        }
        if let Some(max) = bounds.max_duration_secs {
            if max < bounds.min_duration_secs {
                return Err(LendingError::OutOfBounds {
                    field: "max_duration_secs",
                    value: max.to_string(),
                });
            }
        }

        self.bounds = bounds;
        Ok(())
    }

    /// Identifier the next successful request will receive.
    pub fn next_loan_id(&self) -> LoanId {
        self.next_loan_id
    }

    /// Open a request. Anyone may borrow within the configured bounds.
    pub fn request_loan(
        &mut self,
        pile: &Pile,
        borrower: &str,
        principal: Decimal,
        duration_secs: i64,
        bucket_id: BucketId,
        now: DateTime<Utc>,
    ) -> Result<LoanId, LendingError> {
        if principal <= Decimal::ZERO {
            return Err(LendingError::OutOfBounds {
                field: "principal",
                value: principal.to_string(),
            });
        }
        let principal = validate_amount(principal)?;
        if duration_secs <= 0 {
            return Err(LendingError::OutOfBounds {
                field: "duration_secs",
                value: duration_secs.to_string(),
            });
        }
        if !self.bounds.admits_principal(principal) {
            return Err(LendingError::OutOfBounds {
                field: "principal",
                value: principal.to_string(),
            });
        }
        if !self.bounds.admits_duration(duration_secs) {
            return Err(LendingError::OutOfBounds {
                field: "duration_secs",
                value: duration_secs.to_string(),
            });
        }
        if !pile.contains(bucket_id) {
            return Err(LendingError::UnknownBucket(bucket_id));
        }

        let loan_id = self.next_loan_id;
        self.loans.insert(
            loan_id,
            Loan {
                loan_id,
                borrower: borrower.to_string(),
                principal,
                duration_secs,
                bucket_id,
                status: LoanStatus::Requested,
                chi_at_draw: None,
                created_utc: now,
                funded_utc: None,
                funded_by: None,
                repaid_amount: None,
                closed_utc: None,
            },
        );
        self.next_loan_id += 1;
        Ok(loan_id)
    }

    pub fn loan(&self, loan_id: LoanId) -> Result<&Loan, LendingError> {
        self.loans
            .get(&loan_id)
            .ok_or(LendingError::UnknownLoan(loan_id))
    }

    pub fn loans(&self) -> impl Iterator<Item = &Loan> + '_ {
        self.loans.values()
    }

    /// Ids of loans still awaiting a funder, in ascending order.
    ///
    /// Walks current state on every call; nothing is cached between calls.
    pub fn list_requested(&self) -> impl Iterator<Item = LoanId> + '_ {
        self.loans
            .values()
            .filter(|loan| loan.status == LoanStatus::Requested)
            .map(|loan| loan.loan_id)
    }

    /// Earliest Requested loan with an id above `cursor`.
    pub fn first_requested_after(&self, cursor: LoanId) -> Option<&Loan> {
        self.loans
            .range(cursor.saturating_add(1)..)
            .map(|(_, loan)| loan)
            .find(|loan| loan.status == LoanStatus::Requested)
    }

    /// Fail unless `funder` could fund `loan_id` right now.
    pub fn check_fundable(&self, loan_id: LoanId, funder: &str) -> Result<&Loan, LendingError> {
        self.access.require_permitted(funder)?;
        let loan = self.loan(loan_id)?;
        if loan.status != LoanStatus::Requested {
            return Err(LendingError::invalid_state(
                loan_id,
                format!("loan is {}, not requested", loan.status),
            ));
        }
        Ok(loan)
    }

    /// Transition Requested -> Funded, snapshotting the bucket's chi.
    ///
    /// The status check and the transition happen in one step, so of several
    /// competing funders exactly one succeeds and the rest see `InvalidState`.
    pub fn fund_loan(
        &mut self,
        pile: &mut Pile,
        loan_id: LoanId,
        funder: &str,
        now: DateTime<Utc>,
    ) -> Result<&Loan, LendingError> {
        let bucket_id = self.check_fundable(loan_id, funder)?.bucket_id;
        let chi = pile.open_debt(ORIGINATION_IDENTITY, bucket_id, now)?;

        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LendingError::UnknownLoan(loan_id))?;
        loan.status = LoanStatus::Funded;
        loan.chi_at_draw = Some(chi);
        loan.funded_utc = Some(now);
        loan.funded_by = Some(funder.to_string());
        Ok(&*loan)
    }

    /// Outstanding debt as of `now` without committing a drip.
    ///
    /// `None` while Requested; zero once the loan is closed.
    pub fn quote(
        &self,
        pile: &Pile,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>, LendingError> {
        let loan = self.loan(loan_id)?;
        match (loan.status, loan.chi_at_draw) {
            (LoanStatus::Requested, _) => Ok(None),
            (LoanStatus::Funded, Some(chi_at_draw)) => pile
                .debt_at(loan.principal, loan.bucket_id, chi_at_draw, now)
                .map(Some),
            (LoanStatus::Funded, None) => Err(LendingError::invalid_state(
                loan_id,
                "funded loan has no draw index",
            )),
            (LoanStatus::Repaid | LoanStatus::Defaulted, _) => Ok(Some(Decimal::ZERO)),
        }
    }

    /// Current debt, dripping the loan's bucket first.
    pub fn debt(
        &self,
        pile: &mut Pile,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<Option<Decimal>, LendingError> {
        let loan = self.loan(loan_id)?;
        if loan.status == LoanStatus::Funded {
            pile.drip(loan.bucket_id, now)?;
        }
        self.quote(pile, loan_id, now)
    }

    /// Validate a repayment of `amount` against the debt as of `now`.
    ///
    /// Returns the debt it would settle. Changes nothing.
    pub fn check_repayment(
        &self,
        pile: &Pile,
        loan_id: LoanId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LendingError> {
        let amount = validate_amount(amount)?;
        let loan = self.loan(loan_id)?;
        if loan.status != LoanStatus::Funded {
            return Err(LendingError::invalid_state(
                loan_id,
                format!("loan is {}, not funded", loan.status),
            ));
        }
        let debt = self
            .quote(pile, loan_id, now)?
            .ok_or_else(|| LendingError::invalid_state(loan_id, "funded loan has no debt"))?;

        if amount < debt {
            return Err(LendingError::InsufficientRepayment {
                loan_id,
                amount,
                debt,
            });
        }
        if amount > debt {
            return Err(LendingError::Overpayment {
                loan_id,
                amount,
                debt,
            });
        }
        Ok(debt)
    }

    /// Settle a funded loan with exactly its current debt.
    pub fn repay(
        &mut self,
        pile: &mut Pile,
        loan_id: LoanId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<&Loan, LendingError> {
        let debt = self.check_repayment(pile, loan_id, amount, now)?;
        let bucket_id = self.loan(loan_id)?.bucket_id;

        pile.drip(bucket_id, now)?;
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LendingError::UnknownLoan(loan_id))?;
        loan.status = LoanStatus::Repaid;
        loan.repaid_amount = Some(debt);
        loan.closed_utc = Some(now);
        Ok(&*loan)
    }

    /// Transition an overdue funded loan to Defaulted.
    pub fn mark_default(
        &mut self,
        caller: &str,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<&Loan, LendingError> {
        self.access.require_permitted(caller)?;
        let loan = self
            .loans
            .get_mut(&loan_id)
            .ok_or(LendingError::UnknownLoan(loan_id))?;
        if loan.status != LoanStatus::Funded {
            return Err(LendingError::invalid_state(
                loan_id,
                format!("loan is {}, not funded", loan.status),
            ));
        }
        if !loan.is_overdue(now) {
            let maturity = loan
                .maturity_utc()
                .map(|m| m.to_rfc3339())
                .unwrap_or_default();
            return Err(LendingError::invalid_state(
                loan_id,
                format!("loan does not mature until {}", maturity),
            ));
        }
        loan.status = LoanStatus::Defaulted;
        loan.closed_utc = Some(now);
        Ok(&*loan)
    }
}
