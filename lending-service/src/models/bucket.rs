//! Rate bucket model for the interest accrual engine.

use super::BucketId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Interest-rate class with its own compounding index.
///
/// `chi` only moves forward, and only through a drip.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct RateBucket {
    pub bucket_id: BucketId,
    pub rate_per_second: Decimal,
    pub chi: Decimal,
    pub last_drip_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}
