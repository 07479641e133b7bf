//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Scale a human-readable amount to integer base units (`amount * 10^decimals`),
/// truncated toward zero.
///
/// Returns `None` for negative amounts or when the result does not fit in a `u64`.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Option<u64> {
    if amount < Decimal::ZERO {
        return None;
    }
    let factor = Decimal::from(10u64.checked_pow(decimals)?);
    let scaled = amount.checked_mul(factor)?.trunc();
    scaled.to_u64()
}

/// Convert integer base units back to a human-readable amount.
pub fn from_base_units(units: u64, decimals: u32) -> Decimal {
    let mut value = Decimal::from(units);
    // set_scale fails only above 28 decimals
    if value.set_scale(decimals).is_err() {
        return Decimal::ZERO;
    }
    value.normalize()
}
