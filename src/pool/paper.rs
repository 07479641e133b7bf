//! Paper pool ledger for dry runs and tests.

use super::{DepositRequest, PoolLedger, PoolSnapshot, Withdrawal};
use crate::config::AssetConfig;
use crate::error::{HedgeError, Result};
use crate::position::PositionHandle;
use crate::utils::decimal::from_base_units;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated pool position.
#[derive(Debug, Clone)]
struct PaperPoolPosition {
    lower_price: Decimal,
    upper_price: Decimal,
    pool_asset_units: u64,
    paired_asset_units: u64,
}

#[derive(Debug, Default)]
struct PaperPoolState {
    positions: HashMap<String, PaperPoolPosition>,
    fail_next_add: Option<String>,
    fail_next_remove: Option<String>,
    deposit_count: u64,
    withdraw_count: u64,
}

/// In-memory ledger that scales deposits exactly like the on-chain path.
pub struct PaperPoolLedger {
    state: Arc<RwLock<PaperPoolState>>,
    position_id_counter: AtomicU64,
    pool_asset: AssetConfig,
    paired_asset: AssetConfig,
    latency: Arc<RwLock<Duration>>,
}

impl PaperPoolLedger {
    pub fn new(pool_asset: AssetConfig, paired_asset: AssetConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperPoolState::default())),
            position_id_counter: AtomicU64::new(1),
            pool_asset,
            paired_asset,
            latency: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Reject the next deposit with `reason`.
    pub async fn fail_next_add(&self, reason: impl Into<String>) {
        self.state.write().await.fail_next_add = Some(reason.into());
    }

    /// Reject the next withdrawal with `reason`.
    pub async fn fail_next_remove(&self, reason: impl Into<String>) {
        self.state.write().await.fail_next_remove = Some(reason.into());
    }

    /// Delay every call, to exercise caller timeouts.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    /// Number of open (non-empty) positions.
    pub async fn open_positions(&self) -> usize {
        self.state.read().await.positions.len()
    }

    /// (deposits, withdrawals) executed so far.
    pub async fn call_counts(&self) -> (u64, u64) {
        let state = self.state.read().await;
        (state.deposit_count, state.withdraw_count)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PoolLedger for PaperPoolLedger {
    async fn add_liquidity(&self, request: DepositRequest) -> Result<PositionHandle> {
        self.simulate_latency().await;

        let scaled = request.scale(&self.pool_asset, &self.paired_asset)?;
        let mut state = self.state.write().await;

        if let Some(reason) = state.fail_next_add.take() {
            return Err(HedgeError::LedgerSubmit(reason));
        }
        if request.lower_price >= request.upper_price {
            return Err(HedgeError::LedgerSubmit(format!(
                "invalid range [{}, {}]",
                request.lower_price, request.upper_price
            )));
        }

        let id = format!(
            "paper-pos-{}",
            self.position_id_counter.fetch_add(1, Ordering::SeqCst)
        );
        state.positions.insert(
            id.clone(),
            PaperPoolPosition {
                lower_price: request.lower_price,
                upper_price: request.upper_price,
                pool_asset_units: scaled.pool_asset_units,
                paired_asset_units: scaled.paired_asset_units,
            },
        );
        state.deposit_count += 1;

        info!(
            position_id = %id,
            pool_asset_units = scaled.pool_asset_units,
            paired_asset_units = scaled.paired_asset_units,
            lower = %request.lower_price,
            upper = %request.upper_price,
            "Paper liquidity added"
        );

        Ok(PositionHandle {
            id: id.clone(),
            tx_digest: Some(format!("paper-tx-{}", id)),
        })
    }

    async fn remove_liquidity(&self, handle: &PositionHandle) -> Result<Withdrawal> {
        self.simulate_latency().await;

        let mut state = self.state.write().await;

        if let Some(reason) = state.fail_next_remove.take() {
            return Err(HedgeError::LedgerSubmit(reason));
        }

        let Some(position) = state.positions.remove(&handle.id) else {
            debug!(position_id = %handle.id, "Paper position already closed");
            return Ok(Withdrawal::default());
        };
        state.withdraw_count += 1;

        let withdrawal = Withdrawal {
            pool_asset_amount: from_base_units(position.pool_asset_units, self.pool_asset.decimals),
            paired_asset_amount: from_base_units(
                position.paired_asset_units,
                self.paired_asset.decimals,
            ),
        };

        info!(
            position_id = %handle.id,
            pool_asset = %withdrawal.pool_asset_amount,
            paired_asset = %withdrawal.paired_asset_amount,
            "Paper liquidity removed"
        );

        Ok(withdrawal)
    }

    async fn query_position(&self, handle: &PositionHandle) -> Result<PoolSnapshot> {
        self.simulate_latency().await;

        let state = self.state.read().await;
        let position = state.positions.get(&handle.id).ok_or_else(|| {
            HedgeError::LedgerSubmit(format!("position {} not found", handle.id))
        })?;

        Ok(PoolSnapshot {
            lower_price: position.lower_price,
            upper_price: position.upper_price,
            current_pool_asset_amount: from_base_units(
                position.pool_asset_units,
                self.pool_asset.decimals,
            ),
            current_paired_asset_amount: from_base_units(
                position.paired_asset_units,
                self.paired_asset.decimals,
            ),
        })
    }
}
