use crate::models::{BucketId, LoanBounds, RateBucket};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct GrantRequest {
    /// `asset`, `pile`, `origination` or `fund:<symbol>`.
    #[validate(length(min = 1, message = "Module cannot be empty"))]
    pub module: String,
    #[validate(length(min = 1, max = 128, message = "Grantee must be 1-128 characters"))]
    pub grantee: String,
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub module: String,
    pub grantee: String,
    pub active: bool,
    /// False when the grant was already in the requested state.
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateBucketRequest {
    /// Per-second growth factor, e.g. `1.000000001`.
    pub rate_per_second: Decimal,
}

#[derive(Debug, Serialize)]
pub struct BucketResponse {
    pub bucket_id: BucketId,
    pub rate_per_second: Decimal,
    /// Last stored index.
    pub chi: Decimal,
    /// Index as of now, without dripping.
    pub current_chi: Decimal,
    pub last_drip_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl BucketResponse {
    pub fn new(bucket: &RateBucket, current_chi: Decimal) -> Self {
        Self {
            bucket_id: bucket.bucket_id,
            rate_per_second: bucket.rate_per_second,
            chi: bucket.chi,
            current_chi,
            last_drip_utc: bucket.last_drip_utc,
            created_utc: bucket.created_utc,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetBoundsRequest {
    pub min_principal: Decimal,
    pub max_principal: Option<Decimal>,
    #[validate(range(min = 1, message = "Minimum duration must be at least one second"))]
    pub min_duration_secs: i64,
    pub max_duration_secs: Option<i64>,
}

impl From<SetBoundsRequest> for LoanBounds {
    fn from(req: SetBoundsRequest) -> Self {
        LoanBounds {
            min_principal: req.min_principal,
            max_principal: req.max_principal,
            min_duration_secs: req.min_duration_secs,
            max_duration_secs: req.max_duration_secs,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct MintRequest {
    #[validate(length(min = 1, max = 128, message = "Account must be 1-128 characters"))]
    pub to: String,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account: String,
    pub balance: Decimal,
}
