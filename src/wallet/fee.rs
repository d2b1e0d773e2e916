//! Charge calculation
//!
//! `amount = clamp(max(flat, pct * txn / 100), min, max)`, rounded half away
//! from zero to minor units.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::types::ChargeConfig;
use crate::disbursement::MinorUnits;

/// Percentage part of a charge, rounded to minor units.
///
/// Saturates instead of overflowing.
#[inline]
pub fn percentage_of(amount: MinorUnits, percentage: Decimal) -> MinorUnits {
    Decimal::from(amount)
        .checked_mul(percentage)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|v| v.to_i64())
        .unwrap_or(MinorUnits::MAX)
}

/// Charge due for a transaction of `txn_amount`; never negative
pub fn calculate_charge(config: &ChargeConfig, txn_amount: MinorUnits) -> MinorUnits {
    let base = config
        .flat_amount
        .max(percentage_of(txn_amount, config.percentage));
    let floored = base.max(config.min_amount);
    let capped = match config.max_amount {
        Some(max) => floored.min(max),
        None => floored,
    };
    capped.max(0)
}
