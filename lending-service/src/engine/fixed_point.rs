//! Fixed-point helpers for rates, chi and amounts.
//!
//! Rates and chi carry [`CHI_SCALE`] fractional digits. Every intermediate
//! product is truncated toward zero, so compounding never manufactures value
//! and a factor >= 1 never shrinks the index.

use crate::engine::error::LendingError;
use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits kept for rates and chi.
pub const CHI_SCALE: u32 = 18;

/// Accept a per-second rate if it is >= 1.0 and fits in [`CHI_SCALE`] digits.
pub fn validate_rate(rate: Decimal) -> Result<Decimal, LendingError> {
    let normalized = rate.normalize();
    if normalized < Decimal::ONE || normalized.scale() > CHI_SCALE {
        return Err(LendingError::InvalidRate(rate));
    }
    Ok(normalized)
}

/// Amounts are whole, positive base units.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, LendingError> {
    if amount <= Decimal::ZERO || !amount.fract().is_zero() {
        return Err(LendingError::InvalidAmount(amount));
    }
    Ok(amount.normalize())
}

fn mul_down(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_mul(b)
        .map(|p| p.round_dp_with_strategy(CHI_SCALE, RoundingStrategy::ToZero))
}

/// `base ^ exp` by binary exponentiation (discrete per-second compounding).
pub fn rpow(base: Decimal, mut exp: u64) -> Option<Decimal> {
    let mut result = Decimal::ONE;
    let mut factor = base;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul_down(result, factor)?;
        }
        exp >>= 1;
        if exp > 0 {
            factor = mul_down(factor, factor)?;
        }
    }
    Some(result)
}

/// Advance `chi` by `elapsed_secs` seconds at `rate`.
pub fn compound(chi: Decimal, rate: Decimal, elapsed_secs: u64) -> Result<Decimal, LendingError> {
    if elapsed_secs == 0 || rate == Decimal::ONE {
        return Ok(chi);
    }
    rpow(rate, elapsed_secs)
        .and_then(|growth| mul_down(chi, growth))
        .ok_or(LendingError::ArithmeticOverflow("compounding chi"))
}

/// `floor(amount * numerator / denominator)`.
///
/// Identical numerator and denominator return `amount` untouched, so a debt
/// read in the same second it was drawn equals the principal exactly.
pub fn mul_div_floor(
    amount: Decimal,
    numerator: Decimal,
    denominator: Decimal,
) -> Result<Decimal, LendingError> {
    if numerator == denominator {
        return Ok(amount);
    }
    if denominator.is_zero() {
        return Err(LendingError::ArithmeticOverflow("dividing by zero"));
    }
    amount
        .checked_mul(numerator)
        .and_then(|p| p.checked_div(denominator))
        .map(|v| v.floor())
        .ok_or(LendingError::ArithmeticOverflow("scaling an amount"))
}
