//! The hedged position record.
//!
//! A single `Position` value is the authoritative view of both legs. Controller
//! operations take a `Position` and return the next one; nothing else mutates it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of the hedged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Uninitialized,
    Active,
    Rebalancing,
    Faulted,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Uninitialized => "UNINITIALIZED",
            PositionStatus::Active => "ACTIVE",
            PositionStatus::Rebalancing => "REBALANCING",
            PositionStatus::Faulted => "FAULTED",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNINITIALIZED" => Ok(PositionStatus::Uninitialized),
            "ACTIVE" => Ok(PositionStatus::Active),
            "REBALANCING" => Ok(PositionStatus::Rebalancing),
            "FAULTED" => Ok(PositionStatus::Faulted),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

/// Opaque reference to an open pool position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionHandle {
    /// On-chain position object id
    pub id: String,
    /// Digest of the transaction that opened it
    #[serde(default)]
    pub tx_digest: Option<String>,
}

impl PositionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tx_digest: None,
        }
    }
}

/// Reference to an open hedge on the derivatives venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRef {
    /// Venue order id
    pub order_id: String,
    /// Venue symbol (e.g. "SUIUSDC")
    pub symbol: String,
    /// Quantity asked for
    pub requested_quantity: Decimal,
    /// Quantity actually filled; may be below `requested_quantity`
    pub filled_quantity: Decimal,
}

impl OrderRef {
    pub fn is_partial_fill(&self) -> bool {
        self.filled_quantity < self.requested_quantity
    }
}

/// The saga step that failed and left the position `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedStep {
    /// Opening the pool leg
    PoolDeposit,
    /// Opening the hedge leg after the pool leg was committed
    HedgeOpen,
    /// Tearing down the pool leg during rebalance
    PoolWithdraw,
    /// Reading price or computing the new range mid-rebalance
    RangeRecompute,
    /// Closing the hedge leg during rebalance
    HedgeClose,
    /// The process stopped while a rebalance was in flight
    Interrupted,
}

impl FailedStep {
    /// Which leg the step touches, for alert text.
    pub fn leg(&self) -> &'static str {
        match self {
            FailedStep::PoolDeposit | FailedStep::PoolWithdraw => "pool",
            FailedStep::HedgeOpen | FailedStep::HedgeClose => "hedge",
            FailedStep::RangeRecompute => "range",
            FailedStep::Interrupted => "pool and hedge",
        }
    }
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailedStep::PoolDeposit => "pool deposit",
            FailedStep::HedgeOpen => "hedge open",
            FailedStep::PoolWithdraw => "pool withdraw",
            FailedStep::RangeRecompute => "range recompute",
            FailedStep::HedgeClose => "hedge close",
            FailedStep::Interrupted => "interrupted rebalance",
        };
        f.write_str(name)
    }
}

/// What is known about the external legs after a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegState {
    /// Both legs confirmed closed; capital is idle but not exposed
    Closed,
    /// Pool leg is live without a hedge; directionally exposed
    Unhedged,
    /// A teardown call failed; the leg may or may not still be open
    Unknown,
}

/// Why and where a position became `Faulted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub step: FailedStep,
    pub legs: LegState,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// The hedged position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub pool_asset_amount: Decimal,
    pub paired_asset_amount: Decimal,
    /// Quantity currently shorted on the hedge venue
    pub hedge_size: Decimal,
    pub pool_handle: Option<PositionHandle>,
    pub hedge_order_ref: Option<OrderRef>,
    pub status: PositionStatus,
    pub fault: Option<FaultRecord>,
    /// Price the current range was centered on
    pub entry_price: Decimal,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub rebalance_count: u32,
}

impl Default for Position {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl Position {
    /// A position with no legs.
    pub fn uninitialized() -> Self {
        Self {
            lower_price: Decimal::ZERO,
            upper_price: Decimal::ZERO,
            pool_asset_amount: Decimal::ZERO,
            paired_asset_amount: Decimal::ZERO,
            hedge_size: Decimal::ZERO,
            pool_handle: None,
            hedge_order_ref: None,
            status: PositionStatus::Uninitialized,
            fault: None,
            entry_price: Decimal::ZERO,
            opened_at: None,
            updated_at: Utc::now(),
            rebalance_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    pub fn has_open_legs(&self) -> bool {
        self.pool_handle.is_some() || self.hedge_order_ref.is_some()
    }

    /// Pool-asset exposure not covered by the hedge (positive = net long).
    pub fn net_delta(&self) -> Decimal {
        let pool_exposure = if self.pool_handle.is_some() {
            self.pool_asset_amount
        } else {
            Decimal::ZERO
        };
        pool_exposure - self.hedge_size
    }

    /// Move to `Faulted`, recording the failed step.
    pub fn into_faulted(
        mut self,
        step: FailedStep,
        legs: LegState,
        error: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        self.status = PositionStatus::Faulted;
        self.fault = Some(FaultRecord {
            step,
            legs,
            error: error.into(),
            at: now,
        });
        self.updated_at = now;
        self
    }

    /// Record that the pool leg has been withdrawn.
    pub fn clear_pool_leg(mut self) -> Self {
        self.pool_handle = None;
        self.updated_at = Utc::now();
        self
    }

    /// Record that the hedge leg has been closed.
    pub fn clear_hedge_leg(mut self) -> Self {
        self.hedge_order_ref = None;
        self.hedge_size = Decimal::ZERO;
        self.updated_at = Utc::now();
        self
    }

    pub fn with_status(mut self, status: PositionStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }

    /// Whether a `Faulted` position has both legs confirmed closed.
    pub fn is_idle_fault(&self) -> bool {
        self.status == PositionStatus::Faulted
            && !self.has_open_legs()
            && self
                .fault
                .as_ref()
                .map(|f| f.legs == LegState::Closed)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn active_position() -> Position {
        Position {
            lower_price: dec!(0.95),
            upper_price: dec!(1.05),
            pool_asset_amount: dec!(500),
            paired_asset_amount: dec!(500),
            hedge_size: dec!(500),
            pool_handle: Some(PositionHandle::new("0xpos")),
            hedge_order_ref: Some(OrderRef {
                order_id: "1".to_string(),
                symbol: "SUIUSDC".to_string(),
                requested_quantity: dec!(500),
                filled_quantity: dec!(500),
            }),
            status: PositionStatus::Active,
            entry_price: dec!(1),
            opened_at: Some(Utc::now()),
            ..Position::uninitialized()
        }
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [
            PositionStatus::Uninitialized,
            PositionStatus::Active,
            PositionStatus::Rebalancing,
            PositionStatus::Faulted,
        ] {
            assert_eq!(status.as_str().parse::<PositionStatus>(), Ok(status));
        }
        assert!("OPEN".parse::<PositionStatus>().is_err());
    }

    #[test]
    fn test_net_delta_hedged() {
        let position = active_position();
        assert_eq!(position.net_delta(), Decimal::ZERO);

        let unhedged = position.clear_hedge_leg();
        assert_eq!(unhedged.net_delta(), dec!(500));
    }

    #[test]
    fn test_idle_fault_requires_closed_legs() {
        let position = active_position();
        let faulted = position.clone().into_faulted(
            FailedStep::HedgeClose,
            LegState::Unknown,
            "venue timeout",
        );
        assert_eq!(faulted.status, PositionStatus::Faulted);
        assert!(!faulted.is_idle_fault());

        let idle = position
            .clear_pool_leg()
            .clear_hedge_leg()
            .into_faulted(FailedStep::PoolDeposit, LegState::Closed, "rejected");
        assert!(idle.is_idle_fault());
        assert_eq!(idle.fault.as_ref().map(|f| f.step.leg()), Some("pool"));
    }

    #[test]
    fn test_partial_fill_flag() {
        let order = OrderRef {
            order_id: "7".to_string(),
            symbol: "SUIUSDC".to_string(),
            requested_quantity: dec!(500),
            filled_quantity: dec!(480),
        };
        assert!(order.is_partial_fill());
    }
}
