//! Binance futures short as the hedge leg.

use crate::error::{HedgeError, Result};
use crate::exchange::client::BinanceClient;
use crate::exchange::traits::HedgeVenue;
use crate::exchange::types::{NewOrder, OrderSide, OrderType};
use crate::position::OrderRef;
use crate::utils::decimal::round_down_to_lot;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Hedge venue backed by a one-way-mode Binance perpetual.
pub struct BinanceHedgeVenue {
    client: Arc<BinanceClient>,
    symbol: String,
    lot_size: Decimal,
}

impl BinanceHedgeVenue {
    pub fn new(
        client: Arc<BinanceClient>,
        symbol: impl Into<String>,
        quantity_precision: u32,
    ) -> Self {
        Self {
            client,
            symbol: symbol.into(),
            lot_size: Decimal::new(1, quantity_precision),
        }
    }

    /// Current signed position amount (negative = short).
    async fn position_amount(&self) -> Result<Decimal> {
        let positions = self
            .client
            .get_positions(&self.symbol)
            .await
            .map_err(venue_error)?;

        Ok(positions
            .iter()
            .filter(|p| p.symbol == self.symbol)
            .map(|p| p.position_amt)
            .sum())
    }
}

fn venue_error(e: anyhow::Error) -> HedgeError {
    HedgeError::VenueSubmit(format!("{:#}", e))
}

#[async_trait]
impl HedgeVenue for BinanceHedgeVenue {
    async fn open_short(&self, quantity: Decimal) -> Result<OrderRef> {
        let rounded = round_down_to_lot(quantity, self.lot_size);
        if rounded <= Decimal::ZERO {
            return Err(HedgeError::VenueSubmit(format!(
                "hedge quantity {} is below lot size {}",
                quantity, self.lot_size
            )));
        }

        let order = NewOrder {
            symbol: self.symbol.clone(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity: Some(rounded),
            reduce_only: None,
            new_client_order_id: None,
        };

        let response = self
            .client
            .place_futures_order(&order)
            .await
            .map_err(venue_error)?;

        if response.status.is_dead() && response.executed_qty == Decimal::ZERO {
            return Err(HedgeError::VenueSubmit(format!(
                "short order {} ended {:?} without fills",
                response.order_id, response.status
            )));
        }

        if response.executed_qty < rounded {
            warn!(
                symbol = %self.symbol,
                order_id = response.order_id,
                requested = %rounded,
                filled = %response.executed_qty,
                "Hedge short partially filled"
            );
        } else {
            info!(
                symbol = %self.symbol,
                order_id = response.order_id,
                filled = %response.executed_qty,
                avg_price = %response.avg_price,
                "Hedge short filled"
            );
        }

        Ok(OrderRef {
            order_id: response.order_id.to_string(),
            symbol: self.symbol.clone(),
            requested_quantity: rounded,
            filled_quantity: response.executed_qty,
        })
    }

    async fn close_short(&self, order: &OrderRef) -> Result<Decimal> {
        let amount = self.position_amount().await?;
        if amount >= Decimal::ZERO || order.filled_quantity <= Decimal::ZERO {
            info!(
                symbol = %self.symbol,
                order_id = %order.order_id,
                "No open short to close"
            );
            return Ok(Decimal::ZERO);
        }

        // Never buy back more than this hedge opened
        let quantity = amount.abs().min(order.filled_quantity);

        let close = NewOrder {
            symbol: self.symbol.clone(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            reduce_only: Some(true),
            new_client_order_id: None,
        };

        let response = self
            .client
            .place_futures_order(&close)
            .await
            .map_err(venue_error)?;

        if response.executed_qty < quantity {
            return Err(HedgeError::VenueSubmit(format!(
                "close order {} filled {} of {}",
                response.order_id, response.executed_qty, quantity
            )));
        }

        info!(
            symbol = %self.symbol,
            order_id = response.order_id,
            closed = %response.executed_qty,
            "Hedge short closed"
        );

        Ok(response.executed_qty)
    }

    async fn query_short(&self) -> Result<Decimal> {
        let amount = self.position_amount().await?;
        Ok(if amount < Decimal::ZERO {
            amount.abs()
        } else {
            Decimal::ZERO
        })
    }
}
