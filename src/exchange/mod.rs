//! Exchange integrations for the hedge leg and price data.
//!
//! ## Binance
//! USDⓈ-M futures REST connectivity for:
//! - Reference price (public ticker)
//! - Opening and closing the hedge short
//! - Querying the current short size
//!
//! ## Paper
//! In-memory venue and oracle for dry runs and tests.

mod client;
mod hedge;
pub mod paper;
pub mod traits;
mod types;

pub use client::BinanceClient;
pub use hedge::BinanceHedgeVenue;
pub use paper::{PaperHedgeVenue, PaperPriceOracle};
pub use traits::{HedgeVenue, PriceOracle};
pub use types::*;
