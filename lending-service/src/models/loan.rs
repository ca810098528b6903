//! Loan model for the origination registry.

use super::{BucketId, LoanId};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Loan lifecycle: Requested -> Funded -> {Repaid | Defaulted}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Requested,
    Funded,
    Repaid,
    Defaulted,
}

impl LoanStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Funded => "funded",
            Self::Repaid => "repaid",
            Self::Defaulted => "defaulted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Repaid | Self::Defaulted)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A loan as recorded by the origination registry.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: LoanId,
    pub borrower: String,
    pub principal: Decimal,
    pub duration_secs: i64,
    pub bucket_id: BucketId,
    pub status: LoanStatus,
    /// Bucket chi at the funding instant; set exactly once.
    pub chi_at_draw: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
    pub funded_utc: Option<DateTime<Utc>>,
    pub funded_by: Option<String>,
    pub repaid_amount: Option<Decimal>,
    pub closed_utc: Option<DateTime<Utc>>,
}

impl Loan {
    /// Instant after which a funded loan may be marked defaulted.
    pub fn maturity_utc(&self) -> Option<DateTime<Utc>> {
        self.funded_utc
            .map(|funded| funded + Duration::seconds(self.duration_secs))
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Funded && self.maturity_utc().is_some_and(|m| now > m)
    }

    pub fn terms(&self) -> LoanTerms {
        LoanTerms {
            loan_id: self.loan_id,
            borrower: self.borrower.clone(),
            principal: self.principal,
            duration_secs: self.duration_secs,
            bucket_id: self.bucket_id,
        }
    }
}

/// Requested terms of a loan, as seen by a delegate policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub loan_id: LoanId,
    pub borrower: String,
    pub principal: Decimal,
    pub duration_secs: i64,
    pub bucket_id: BucketId,
}

/// Origination limits enforced on every loan request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanBounds {
    pub min_principal: Decimal,
    pub max_principal: Option<Decimal>,
    pub min_duration_secs: i64,
    pub max_duration_secs: Option<i64>,
}

impl Default for LoanBounds {
    fn default() -> Self {
        Self {
            min_principal: Decimal::ONE,
            max_principal: None,
            min_duration_secs: 1,
            max_duration_secs: None,
        }
    }
}

impl LoanBounds {
    pub fn admits_principal(&self, principal: Decimal) -> bool {
        principal >= self.min_principal && self.max_principal.map_or(true, |max| principal <= max)
    }

    pub fn admits_duration(&self, duration_secs: i64) -> bool {
        duration_secs >= self.min_duration_secs
            && self.max_duration_secs.map_or(true, |max| duration_secs <= max)
    }
}

/// Singleton row holding the registry counter and bounds.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct OriginationConfig {
    pub next_loan_id: LoanId,
    pub min_principal: Decimal,
    pub max_principal: Option<Decimal>,
    pub min_duration_secs: i64,
    pub max_duration_secs: Option<i64>,
}

impl OriginationConfig {
    pub fn new(next_loan_id: LoanId, bounds: &LoanBounds) -> Self {
        Self {
            next_loan_id,
            min_principal: bounds.min_principal,
            max_principal: bounds.max_principal,
            min_duration_secs: bounds.min_duration_secs,
            max_duration_secs: bounds.max_duration_secs,
        }
    }

    pub fn bounds(&self) -> LoanBounds {
        LoanBounds {
            min_principal: self.min_principal,
            max_principal: self.max_principal,
            min_duration_secs: self.min_duration_secs,
            max_duration_secs: self.max_duration_secs,
        }
    }
}
