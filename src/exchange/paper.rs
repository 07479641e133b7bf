//! Paper hedge venue and price source for dry runs and tests.

use crate::error::{HedgeError, Result};
use crate::exchange::traits::{HedgeVenue, PriceOracle};
use crate::position::OrderRef;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Simulated short book.
#[derive(Debug, Default)]
pub struct PaperHedgeState {
    /// Open shorts keyed by order id
    pub shorts: HashMap<String, Decimal>,
    pub total_trading_fees: Decimal,
    pub order_count: u64,
    fail_next_open: Option<String>,
    fail_next_close: Option<String>,
    /// Fraction of each short that fills (1.0 = full fill)
    fill_ratio: Option<Decimal>,
}

/// Simulated derivatives venue that fills market shorts at the oracle price.
pub struct PaperHedgeVenue {
    state: Arc<RwLock<PaperHedgeState>>,
    order_id_counter: AtomicU64,
    symbol: String,
    oracle: Arc<dyn PriceOracle>,
    /// Trading fee rate (0.04% taker)
    fee_rate: Decimal,
    latency: Arc<RwLock<Duration>>,
}

impl PaperHedgeVenue {
    pub fn new(symbol: impl Into<String>, oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperHedgeState::default())),
            order_id_counter: AtomicU64::new(1),
            symbol: symbol.into(),
            oracle,
            fee_rate: dec!(0.0004),
            latency: Arc::new(RwLock::new(Duration::ZERO)),
        }
    }

    /// Reject the next short with `reason`.
    pub async fn fail_next_open(&self, reason: impl Into<String>) {
        self.state.write().await.fail_next_open = Some(reason.into());
    }

    /// Reject the next close with `reason`.
    pub async fn fail_next_close(&self, reason: impl Into<String>) {
        self.state.write().await.fail_next_close = Some(reason.into());
    }

    /// Fill only `ratio` of each subsequent short.
    pub async fn set_fill_ratio(&self, ratio: Decimal) {
        self.state.write().await.fill_ratio = Some(ratio);
    }

    /// Delay every call, to exercise caller timeouts.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = latency;
    }

    /// (order count, total fees) so far.
    pub async fn stats(&self) -> (u64, Decimal) {
        let state = self.state.read().await;
        (state.order_count, state.total_trading_fees)
    }

    fn next_order_id(&self) -> String {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }

    async fn mark_price(&self) -> Decimal {
        match self.oracle.get_price(&self.symbol).await {
            Ok(price) => price,
            Err(e) => {
                debug!(error = %e, "Paper mark price unavailable; no fee charged");
                Decimal::ZERO
            }
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl HedgeVenue for PaperHedgeVenue {
    async fn open_short(&self, quantity: Decimal) -> Result<OrderRef> {
        self.simulate_latency().await;

        if quantity <= Decimal::ZERO {
            return Err(HedgeError::VenueSubmit(format!(
                "invalid short quantity {}",
                quantity
            )));
        }

        let price = self.mark_price().await;
        let mut state = self.state.write().await;

        if let Some(reason) = state.fail_next_open.take() {
            return Err(HedgeError::VenueSubmit(reason));
        }

        let filled = match state.fill_ratio {
            Some(ratio) => (quantity * ratio).round_dp(8),
            None => quantity,
        };
        let fee = filled * price * self.fee_rate;
        let order_id = self.next_order_id();

        state.shorts.insert(order_id.clone(), filled);
        state.total_trading_fees += fee;
        state.order_count += 1;

        info!(
            order_id = %order_id,
            symbol = %self.symbol,
            requested = %quantity,
            filled = %filled,
            price = %price,
            fee = %fee,
            "Paper short executed"
        );

        Ok(OrderRef {
            order_id,
            symbol: self.symbol.clone(),
            requested_quantity: quantity,
            filled_quantity: filled,
        })
    }

    async fn close_short(&self, order: &OrderRef) -> Result<Decimal> {
        self.simulate_latency().await;

        let price = self.mark_price().await;
        let mut state = self.state.write().await;

        if let Some(reason) = state.fail_next_close.take() {
            return Err(HedgeError::VenueSubmit(reason));
        }

        let Some(quantity) = state.shorts.remove(&order.order_id) else {
            debug!(order_id = %order.order_id, "Paper short already closed");
            return Ok(Decimal::ZERO);
        };

        let fee = quantity * price * self.fee_rate;
        state.total_trading_fees += fee;
        state.order_count += 1;

        info!(
            order_id = %order.order_id,
            symbol = %self.symbol,
            quantity = %quantity,
            price = %price,
            "Paper short closed"
        );

        Ok(quantity)
    }

    async fn query_short(&self) -> Result<Decimal> {
        self.simulate_latency().await;
        Ok(self.state.read().await.shorts.values().copied().sum())
    }
}

/// Settable price source.
pub struct PaperPriceOracle {
    price: RwLock<Decimal>,
    fail_next: RwLock<Option<String>>,
}

impl PaperPriceOracle {
    pub fn new(price: Decimal) -> Self {
        Self {
            price: RwLock::new(price),
            fail_next: RwLock::new(None),
        }
    }

    pub async fn set_price(&self, price: Decimal) {
        *self.price.write().await = price;
    }

    /// Fail the next `get_price` with `reason`.
    pub async fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.write().await = Some(reason.into());
    }

    pub async fn current(&self) -> Decimal {
        *self.price.read().await
    }
}

#[async_trait]
impl PriceOracle for PaperPriceOracle {
    async fn get_price(&self, _pair_symbol: &str) -> Result<Decimal> {
        if let Some(reason) = self.fail_next.write().await.take() {
            return Err(HedgeError::Oracle(reason));
        }
        Ok(self.current().await)
    }
}
