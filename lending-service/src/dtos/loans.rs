use crate::models::{BucketId, Loan, LoanId, LoanStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_duration"))]
pub struct RequestLoanRequest {
    pub principal: Decimal,
    /// Exactly one of `duration_secs` and `duration_days` must be set.
    pub duration_secs: Option<i64>,
    pub duration_days: Option<i64>,
    pub bucket_id: BucketId,
}

fn validate_duration(req: &RequestLoanRequest) -> Result<(), ValidationError> {
    match (req.duration_secs, req.duration_days) {
        (Some(_), None) => Ok(()),
        (None, Some(days)) if days.checked_mul(SECONDS_PER_DAY).is_some() => Ok(()),
        (None, Some(_)) => Err(ValidationError::new("duration_days_overflow")),
        _ => Err(ValidationError::new("duration_secs_xor_duration_days")),
    }
}

impl RequestLoanRequest {
    pub fn duration_secs(&self) -> i64 {
        self.duration_secs
            .or_else(|| self.duration_days.and_then(|d| d.checked_mul(SECONDS_PER_DAY)))
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct LoanResponse {
    pub loan_id: LoanId,
    pub borrower: String,
    pub principal: Decimal,
    pub duration_secs: i64,
    pub bucket_id: BucketId,
    pub status: LoanStatus,
    pub chi_at_draw: Option<Decimal>,
    pub created_utc: DateTime<Utc>,
    pub funded_utc: Option<DateTime<Utc>>,
    pub funded_by: Option<String>,
    pub maturity_utc: Option<DateTime<Utc>>,
    pub repaid_amount: Option<Decimal>,
    pub closed_utc: Option<DateTime<Utc>>,
}

impl From<&Loan> for LoanResponse {
    fn from(loan: &Loan) -> Self {
        Self {
            loan_id: loan.loan_id,
            borrower: loan.borrower.clone(),
            principal: loan.principal,
            duration_secs: loan.duration_secs,
            bucket_id: loan.bucket_id,
            status: loan.status,
            chi_at_draw: loan.chi_at_draw,
            created_utc: loan.created_utc,
            funded_utc: loan.funded_utc,
            funded_by: loan.funded_by.clone(),
            maturity_utc: loan.maturity_utc(),
            repaid_amount: loan.repaid_amount,
            closed_utc: loan.closed_utc,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DebtResponse {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    /// Absent while the loan is still only requested.
    pub debt: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct RepayRequest {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RequestedLoansResponse {
    pub loan_ids: Vec<LoanId>,
}

#[derive(Debug, Serialize)]
pub struct NextLoanIdResponse {
    pub next_loan_id: LoanId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(secs: Option<i64>, days: Option<i64>) -> RequestLoanRequest {
        RequestLoanRequest {
            principal: Decimal::from(100),
            duration_secs: secs,
            duration_days: days,
            bucket_id: 1,
        }
    }

    #[test]
    fn days_convert_to_seconds() {
        let req = request(None, Some(30));
        assert!(req.validate().is_ok());
        assert_eq!(req.duration_secs(), 30 * 86_400);
    }

    #[test]
    fn exactly_one_duration_is_required() {
        assert!(request(None, None).validate().is_err());
        assert!(request(Some(60), Some(1)).validate().is_err());
        assert!(request(None, Some(i64::MAX)).validate().is_err());
        assert!(request(Some(60), None).validate().is_ok());
    }
}
