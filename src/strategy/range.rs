//! Range and capital split for a new pool position.

use crate::error::{HedgeError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A computed liquidity range with the deposit amounts for each asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangePlan {
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    /// Hedged asset to deposit (and short)
    pub pool_asset_amount: Decimal,
    /// Quote asset to deposit
    pub paired_asset_amount: Decimal,
}

/// Center a range of half-width `range_fraction` on `price` and split `capital`
/// evenly by value between the two assets.
pub fn compute_range(
    price: Decimal,
    capital: Decimal,
    range_fraction: Decimal,
) -> Result<RangePlan> {
    if price <= Decimal::ZERO {
        return Err(HedgeError::InvalidInput(format!(
            "price must be positive, got {}",
            price
        )));
    }
    if capital <= Decimal::ZERO {
        return Err(HedgeError::InvalidInput(format!(
            "capital must be positive, got {}",
            capital
        )));
    }
    if range_fraction <= Decimal::ZERO || range_fraction >= Decimal::ONE {
        return Err(HedgeError::InvalidInput(format!(
            "range fraction must be in (0, 1), got {}",
            range_fraction
        )));
    }

    let overflow = || {
        HedgeError::InvalidInput(format!(
            "range for price {} and capital {} is outside decimal bounds",
            price, capital
        ))
    };

    let half = capital * dec!(0.5);
    let upper_price = price
        .checked_mul(Decimal::ONE + range_fraction)
        .ok_or_else(overflow)?;
    let pool_asset_amount = half.checked_div(price).ok_or_else(overflow)?;

    Ok(RangePlan {
        lower_price: price * (Decimal::ONE - range_fraction),
        upper_price,
        pool_asset_amount,
        paired_asset_amount: half,
    })
}
