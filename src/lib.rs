//! # CLMM Hedger
//!
//! Keeps a concentrated-liquidity pool position delta-neutral with an
//! offsetting perpetual futures short, and rebuilds both legs when price
//! drifts toward the edge of the range.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Typed error taxonomy
//! - `exchange`: Price oracle and hedge venue (Binance USDⓈ-M, paper)
//! - `pool`: Concentrated-liquidity pool leg
//! - `position`: The hedged position record
//! - `strategy`: Range calculation, rebalance controller and poll loop
//! - `notify`: Alerts and report delivery (Telegram, log)
//! - `persistence`: SQLite-based position persistence
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod notify;
pub mod persistence;
pub mod pool;
pub mod position;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{HedgeError, Result};
