//! Typed error taxonomy for the hedge lifecycle.
//!
//! Each variant carries its own recovery policy:
//! - `InvalidInput`: bad arguments to a pure calculator, fails the call only
//! - `Config`: invalid configuration, fatal at startup
//! - `LedgerSubmit` / `VenueSubmit`: an external leg failed or timed out, the
//!   position goes `Faulted` and an alert is raised
//! - `Oracle`: price fetch failed, the iteration is skipped without a state change

use thiserror::Error;

/// Errors produced by the hedge core and its collaborators.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HedgeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pool ledger submission failed: {0}")]
    LedgerSubmit(String),

    #[error("Hedge venue submission failed: {0}")]
    VenueSubmit(String),

    #[error("Price oracle error: {0}")]
    Oracle(String),

    #[error("Rebalance rejected: position is {0}")]
    RebalanceRejected(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl HedgeError {
    /// Whether this error leaves an external leg in a state that must be alerted on.
    pub fn is_submission_failure(&self) -> bool {
        matches!(self, HedgeError::LedgerSubmit(_) | HedgeError::VenueSubmit(_))
    }
}

/// Result type alias for hedge core operations.
pub type Result<T> = std::result::Result<T, HedgeError>;
