//! Interest accrual engine.
//!
//! Each rate bucket carries a compounding index `chi`. Indices are advanced
//! lazily: a bucket is dripped whenever a dependent read or write needs its
//! current value, never by a background timer.

use crate::engine::access::{AccessControl, ModuleId};
use crate::engine::error::LendingError;
use crate::engine::fixed_point::{compound, mul_div_floor, validate_rate};
use crate::models::{BucketId, Grant, RateBucket};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct Pile {
    access: AccessControl,
    buckets: BTreeMap<BucketId, RateBucket>,
    next_bucket_id: BucketId,
    /// Buckets whose chi moved since the last [`Pile::take_dripped`].
    dripped: BTreeSet<BucketId>,
}

impl Pile {
    pub fn new(deployer: &str) -> Self {
        Self {
            access: AccessControl::new(ModuleId::Pile, deployer),
            buckets: BTreeMap::new(),
            next_bucket_id: 1,
            dripped: BTreeSet::new(),
        }
    }

    pub fn restore(grants: &[Grant], buckets: Vec<RateBucket>) -> Self {
        let next_bucket_id = buckets.iter().map(|b| b.bucket_id).max().unwrap_or(0) + 1;
        Self {
            access: AccessControl::restore(ModuleId::Pile, grants),
            buckets: buckets.into_iter().map(|b| (b.bucket_id, b)).collect(),
            next_bucket_id,
            dripped: BTreeSet::new(),
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut AccessControl {
        &mut self.access
    }

    /// Open a new rate class with chi = 1 and the drip clock set to `now`.
    pub fn create_bucket(
        &mut self,
        caller: &str,
        rate_per_second: Decimal,
        now: DateTime<Utc>,
    ) -> Result<BucketId, LendingError> {
        self.access.require_permitted(caller)?;
        let rate_per_second = validate_rate(rate_per_second)?;

        let bucket_id = self.next_bucket_id;
        self.buckets.insert(
            bucket_id,
            RateBucket {
                bucket_id,
                rate_per_second,
                chi: Decimal::ONE,
                last_drip_utc: now,
                created_utc: now,
            },
        );
        self.next_bucket_id += 1;
        Ok(bucket_id)
    }

    pub fn bucket(&self, bucket_id: BucketId) -> Result<&RateBucket, LendingError> {
        self.buckets
            .get(&bucket_id)
            .ok_or(LendingError::UnknownBucket(bucket_id))
    }

    pub fn contains(&self, bucket_id: BucketId) -> bool {
        self.buckets.contains_key(&bucket_id)
    }

    pub fn buckets(&self) -> impl Iterator<Item = &RateBucket> + '_ {
        self.buckets.values()
    }

    /// Chi the bucket would have after a drip at `now`, without storing it.
    pub fn chi_at(&self, bucket_id: BucketId, now: DateTime<Utc>) -> Result<Decimal, LendingError> {
        let bucket = self.bucket(bucket_id)?;
        let elapsed = (now - bucket.last_drip_utc).num_seconds();
        if elapsed <= 0 {
            return Ok(bucket.chi);
        }
        compound(bucket.chi, bucket.rate_per_second, elapsed as u64)
    }

    /// Advance the bucket's chi to `now` and return it.
    ///
    /// Dripping twice at the same instant, or at an instant earlier than the
    /// last drip, leaves chi untouched.
    pub fn drip(&mut self, bucket_id: BucketId, now: DateTime<Utc>) -> Result<Decimal, LendingError> {
        let chi = self.chi_at(bucket_id, now)?;
        let bucket = self
            .buckets
            .get_mut(&bucket_id)
            .ok_or(LendingError::UnknownBucket(bucket_id))?;
        if now > bucket.last_drip_utc {
            bucket.chi = chi;
            bucket.last_drip_utc = now;
            self.dripped.insert(bucket_id);
        }
        Ok(bucket.chi)
    }

    pub fn has_dripped(&self) -> bool {
        !self.dripped.is_empty()
    }

    pub fn take_dripped(&mut self) -> BTreeSet<BucketId> {
        std::mem::take(&mut self.dripped)
    }

    /// Drip and return the chi snapshot a newly funded loan draws at.
    pub fn open_debt(
        &mut self,
        caller: &str,
        bucket_id: BucketId,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LendingError> {
        self.access.require_permitted(caller)?;
        self.drip(bucket_id, now)
    }

    /// `floor(principal * chi_now / chi_at_draw)`, dripping first.
    pub fn debt_of(
        &mut self,
        principal: Decimal,
        bucket_id: BucketId,
        chi_at_draw: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LendingError> {
        let chi_now = self.drip(bucket_id, now)?;
        mul_div_floor(principal, chi_now, chi_at_draw)
    }

    /// Same value as [`Pile::debt_of`] without committing the drip.
    pub fn debt_at(
        &self,
        principal: Decimal,
        bucket_id: BucketId,
        chi_at_draw: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LendingError> {
        let chi_now = self.chi_at(bucket_id, now)?;
        mul_div_floor(principal, chi_now, chi_at_draw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn create_bucket_requires_a_grant_and_a_valid_rate() {
        let mut pile = Pile::new("deployer");
        assert!(matches!(
            pile.create_bucket("stranger", dec("1.01"), at(0)),
            Err(LendingError::Unauthorized { .. })
        ));
        assert_eq!(
            pile.create_bucket("deployer", dec("0.5"), at(0)),
            Err(LendingError::InvalidRate(dec("0.5")))
        );

        let id = pile.create_bucket("deployer", dec("1.01"), at(10)).unwrap();
        assert_eq!(id, 1);
        let bucket = pile.bucket(id).unwrap();
        assert_eq!(bucket.chi, Decimal::ONE);
        assert_eq!(bucket.last_drip_utc, at(10));
        assert_eq!(pile.create_bucket("deployer", Decimal::ONE, at(10)), Ok(2));
    }

    #[test]
    fn drip_is_idempotent_within_a_second() {
        let mut pile = Pile::new("deployer");
        let id = pile.create_bucket("deployer", dec("1.1"), at(0)).unwrap();

        let first = pile.drip(id, at(2)).unwrap();
        let second = pile.drip(id, at(2)).unwrap();
        assert_eq!(first, dec("1.21"));
        assert_eq!(first, second);

        // a stale timestamp never rewinds chi
        assert_eq!(pile.drip(id, at(1)).unwrap(), first);
        assert_eq!(pile.bucket(id).unwrap().last_drip_utc, at(2));
    }

    #[test]
    fn split_drips_match_a_single_drip() {
        let mut pile = Pile::new("deployer");
        let a = pile.create_bucket("deployer", dec("1.5"), at(0)).unwrap();
        let b = pile.create_bucket("deployer", dec("1.5"), at(0)).unwrap();

        pile.drip(a, at(1)).unwrap();
        pile.drip(a, at(2)).unwrap();
        let stepped = pile.drip(a, at(3)).unwrap();
        let single = pile.drip(b, at(3)).unwrap();
        assert_eq!(stepped, single);
        assert_eq!(single, dec("3.375"));
    }

    #[test]
    fn drips_are_tracked_until_taken() {
        let mut pile = Pile::new("deployer");
        let id = pile.create_bucket("deployer", dec("1.1"), at(0)).unwrap();
        assert!(!pile.has_dripped());

        pile.drip(id, at(0)).unwrap();
        assert!(!pile.has_dripped());

        pile.drip(id, at(4)).unwrap();
        assert!(pile.has_dripped());
        assert_eq!(pile.take_dripped(), BTreeSet::from([id]));
        assert!(!pile.has_dripped());
    }

    #[test]
    fn chi_at_previews_without_mutation() {
        let mut pile = Pile::new("deployer");
        let id = pile.create_bucket("deployer", dec("2"), at(0)).unwrap();
        assert_eq!(pile.chi_at(id, at(3)).unwrap(), dec("8"));
        assert_eq!(pile.bucket(id).unwrap().chi, Decimal::ONE);
    }

    #[test]
    fn open_debt_is_privileged() {
        let mut pile = Pile::new("deployer");
        let id = pile.create_bucket("deployer", dec("1.01"), at(0)).unwrap();
        assert!(matches!(
            pile.open_debt("origination", id, at(5)),
            Err(LendingError::Unauthorized { .. })
        ));
        pile.access_mut().grant("deployer", "origination").unwrap();
        assert!(pile.open_debt("origination", id, at(5)).unwrap() > Decimal::ONE);
    }

    #[test]
    fn debt_grows_from_principal_and_rounds_down() {
        let mut pile = Pile::new("deployer");
        let id = pile.create_bucket("deployer", dec("1.1"), at(0)).unwrap();
        let chi_at_draw = pile.drip(id, at(1)).unwrap();

        assert_eq!(pile.debt_of(dec("1000"), id, chi_at_draw, at(1)), Ok(dec("1000")));
        assert_eq!(pile.debt_of(dec("1000"), id, chi_at_draw, at(2)), Ok(dec("1100")));
        assert_eq!(pile.debt_of(dec("7"), id, chi_at_draw, at(2)), Ok(dec("7")));
    }

    #[test]
    fn unknown_buckets_are_reported() {
        let mut pile = Pile::new("deployer");
        assert_eq!(pile.drip(9, at(0)), Err(LendingError::UnknownBucket(9)));
        assert_eq!(
            pile.debt_of(Decimal::ONE, 9, Decimal::ONE, at(0)),
            Err(LendingError::UnknownBucket(9))
        );
    }

    #[test]
    fn restore_continues_bucket_numbering() {
        let mut pile = Pile::new("deployer");
        pile.create_bucket("deployer", dec("1.01"), at(0)).unwrap();
        pile.create_bucket("deployer", dec("1.02"), at(0)).unwrap();

        let buckets = pile.buckets().cloned().collect();
        let mut restored = Pile::restore(&pile.access().records(), buckets);
        assert_eq!(restored.create_bucket("deployer", dec("1.03"), at(0)), Ok(3));
    }
}
