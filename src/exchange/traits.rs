//! Venue-agnostic traits for the price source and the hedge leg.
//!
//! The controller only talks to these seams, so the Binance client, the paper
//! simulators and test mocks are interchangeable.

use crate::error::Result;
use crate::position::OrderRef;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Source of the reference price for the hedged pair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current price of `pair_symbol` (e.g. "SUIUSDC").
    ///
    /// Fails with `HedgeError::Oracle`.
    async fn get_price(&self, pair_symbol: &str) -> Result<Decimal>;
}

/// The derivatives venue holding the offsetting short.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HedgeVenue: Send + Sync {
    /// Place a market order shorting `quantity` of the hedged asset.
    ///
    /// On a partial fill the returned ref carries the filled quantity.
    /// Fails with `HedgeError::VenueSubmit`.
    async fn open_short(&self, quantity: Decimal) -> Result<OrderRef>;

    /// Close the short referenced by `order`, returning the quantity bought back.
    ///
    /// Closing an already closed or absent short returns zero.
    async fn close_short(&self, order: &OrderRef) -> Result<Decimal>;

    /// Current short size for the hedged asset (positive number).
    async fn query_short(&self) -> Result<Decimal>;
}
