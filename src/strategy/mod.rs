//! Hedge lifecycle logic.
//!
//! Contains:
//! - Range and capital split for new positions
//! - The rebalance controller (initialize, drift, rebalance, recover)
//! - Status reports
//! - The poll loop that drives the controller

pub mod controller;
pub mod range;
pub mod report;
pub mod scheduler;

pub use controller::{ControllerConfig, RebalanceController};
pub use range::{compute_range, RangePlan};
pub use report::{Boundary, HedgeSizeSource, StatusReport};
pub use scheduler::{
    forward_shutdown, shutdown_signal, IterationOutcome, SchedulerConfig, SchedulerLoop,
};
