//! Concentrated-liquidity pool leg.
//!
//! `PoolLedger` abstracts the on-chain liquidity position. Amounts cross the
//! seam as human-readable decimals; implementations scale them to integer base
//! units with the configured asset precision.

mod paper;

pub use paper::PaperPoolLedger;

use crate::config::AssetConfig;
use crate::error::{HedgeError, Result};
use crate::position::PositionHandle;
use crate::utils::decimal::to_base_units;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

/// Parameters of a liquidity deposit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepositRequest {
    pub pool_asset_amount: Decimal,
    pub paired_asset_amount: Decimal,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    /// Maximum accepted slippage (0.0-1.0)
    pub slippage_tolerance: Decimal,
}

/// A deposit scaled to on-chain integer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaledDeposit {
    pub pool_asset_units: u64,
    pub paired_asset_units: u64,
    /// Minimum pool-asset units accepted after slippage
    pub min_pool_asset_units: u64,
    /// Minimum paired-asset units accepted after slippage
    pub min_paired_asset_units: u64,
}

impl DepositRequest {
    /// Scale both amounts to base units (truncated toward zero) and derive the
    /// slippage-bounded minimums.
    pub fn scale(
        &self,
        pool_asset: &AssetConfig,
        paired_asset: &AssetConfig,
    ) -> Result<ScaledDeposit> {
        let pool_asset_units = scale_amount(self.pool_asset_amount, pool_asset)?;
        let paired_asset_units = scale_amount(self.paired_asset_amount, paired_asset)?;

        let keep = Decimal::ONE - self.slippage_tolerance;
        let min_pool_asset_units = scale_amount(self.pool_asset_amount * keep, pool_asset)?;
        let min_paired_asset_units = scale_amount(self.paired_asset_amount * keep, paired_asset)?;

        Ok(ScaledDeposit {
            pool_asset_units,
            paired_asset_units,
            min_pool_asset_units,
            min_paired_asset_units,
        })
    }
}

fn scale_amount(amount: Decimal, asset: &AssetConfig) -> Result<u64> {
    to_base_units(amount, asset.decimals).ok_or_else(|| {
        HedgeError::InvalidInput(format!(
            "{} amount {} cannot be scaled to {} decimals",
            asset.symbol, amount, asset.decimals
        ))
    })
}

/// Amounts recovered by a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Withdrawal {
    pub pool_asset_amount: Decimal,
    pub paired_asset_amount: Decimal,
}

impl Withdrawal {
    pub fn is_empty(&self) -> bool {
        self.pool_asset_amount == Decimal::ZERO && self.paired_asset_amount == Decimal::ZERO
    }
}

/// Confirmed state of a pool position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub current_pool_asset_amount: Decimal,
    pub current_paired_asset_amount: Decimal,
}

/// The on-chain liquidity position.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PoolLedger: Send + Sync {
    /// Deposit liquidity into `[lower_price, upper_price]`.
    ///
    /// Either the deposit is fully reflected or it is not; fails with
    /// `HedgeError::LedgerSubmit` on rejection or timeout.
    async fn add_liquidity(&self, request: DepositRequest) -> Result<PositionHandle>;

    /// Withdraw all liquidity under `handle`.
    ///
    /// An empty or closed handle returns zero amounts.
    async fn remove_liquidity(&self, handle: &PositionHandle) -> Result<Withdrawal>;

    /// Most recently confirmed state of the position under `handle`.
    async fn query_position(&self, handle: &PositionHandle) -> Result<PoolSnapshot>;
}
