//! Read-only status snapshot of the hedged position.

use crate::notify::escape_markdown;
use crate::position::{FaultRecord, Position, PositionStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Range boundary closest to the current price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Boundary {
    Lower,
    Upper,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Lower => f.write_str("lower"),
            Boundary::Upper => f.write_str("upper"),
        }
    }
}

/// Where the hedge size in a report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HedgeSizeSource {
    /// Queried from the venue
    Venue,
    /// The venue query failed; the last committed size is shown
    Recorded,
}

/// Point-in-time view of both legs.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub status: PositionStatus,
    pub price: Decimal,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    /// Fractional distance to the nearest boundary. Negative when the lower
    /// boundary is nearest, positive when the upper one is.
    pub deviation: Decimal,
    pub nearest_boundary: Option<Boundary>,
    pub in_range: bool,
    pub pool_asset_amount: Decimal,
    pub paired_asset_amount: Decimal,
    pub hedge_size: Decimal,
    pub hedge_size_source: HedgeSizeSource,
    pub net_delta: Decimal,
    pub rebalance_count: u32,
    pub fault: Option<FaultRecord>,
}

impl StatusReport {
    /// Assemble a report from the committed position, a fresh price and the
    /// hedge size to show.
    pub fn build(
        position: &Position,
        price: Decimal,
        hedge_size: Decimal,
        hedge_size_source: HedgeSizeSource,
    ) -> Self {
        let (deviation, nearest_boundary) =
            boundary_deviation(price, position.lower_price, position.upper_price);

        let pool_exposure = if position.pool_handle.is_some() {
            position.pool_asset_amount
        } else {
            Decimal::ZERO
        };

        Self {
            timestamp: Utc::now(),
            status: position.status,
            price,
            lower_price: position.lower_price,
            upper_price: position.upper_price,
            deviation,
            nearest_boundary,
            in_range: position.lower_price > Decimal::ZERO
                && price > position.lower_price
                && price < position.upper_price,
            pool_asset_amount: position.pool_asset_amount,
            paired_asset_amount: position.paired_asset_amount,
            hedge_size,
            hedge_size_source,
            net_delta: pool_exposure - hedge_size,
            rebalance_count: position.rebalance_count,
            fault: position.fault.clone(),
        }
    }

    /// Markdown text for the notifier.
    pub fn render(&self) -> String {
        let mut text = format!(
            "📊 *Position report* \\[{}]\nPrice: {}\nRange: \\[{}, {}]\n",
            self.status,
            fmt_decimal(self.price),
            fmt_decimal(self.lower_price),
            fmt_decimal(self.upper_price),
        );

        match self.nearest_boundary {
            Some(boundary) => text.push_str(&format!(
                "Deviation: {}% from {} boundary{}\n",
                fmt_decimal(self.deviation * Decimal::ONE_HUNDRED),
                boundary,
                if self.in_range { "" } else { " (OUT OF RANGE)" },
            )),
            None => text.push_str("Deviation: n/a (no range)\n"),
        }

        text.push_str(&format!(
            "Pool: {} / {}\nHedge: short {}{}\nNet delta: {}\nRebalances: {}",
            fmt_decimal(self.pool_asset_amount),
            fmt_decimal(self.paired_asset_amount),
            fmt_decimal(self.hedge_size),
            match self.hedge_size_source {
                HedgeSizeSource::Venue => "",
                HedgeSizeSource::Recorded => " (recorded, venue query failed)",
            },
            fmt_decimal(self.net_delta),
            self.rebalance_count,
        ));

        if let Some(fault) = &self.fault {
            text.push_str(&format!(
                "\nFault: {} failed: {}",
                fault.step,
                escape_markdown(&fault.error)
            ));
        }

        text
    }
}

/// Signed fractional deviation from the nearest boundary of `[lower, upper]`.
///
/// Returns zero and no boundary when there is no range.
pub fn boundary_deviation(
    price: Decimal,
    lower: Decimal,
    upper: Decimal,
) -> (Decimal, Option<Boundary>) {
    if lower <= Decimal::ZERO || upper <= lower {
        return (Decimal::ZERO, None);
    }

    let to_lower = (price - lower).abs() / lower;
    let to_upper = (price - upper).abs() / upper;

    if to_lower <= to_upper {
        (-to_lower, Some(Boundary::Lower))
    } else {
        (to_upper, Some(Boundary::Upper))
    }
}

fn fmt_decimal(value: Decimal) -> String {
    value.round_dp(6).normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionHandle;
    use rust_decimal_macros::dec;

    fn active() -> Position {
        Position {
            lower_price: dec!(0.95),
            upper_price: dec!(1.05),
            pool_asset_amount: dec!(500),
            paired_asset_amount: dec!(500),
            hedge_size: dec!(500),
            pool_handle: Some(PositionHandle::new("0xpos")),
            status: PositionStatus::Active,
            ..Position::uninitialized()
        }
    }

    #[test]
    fn test_deviation_sign_follows_nearest_boundary() {
        let (dev, boundary) = boundary_deviation(dec!(0.969), dec!(0.95), dec!(1.05));
        assert_eq!(boundary, Some(Boundary::Lower));
        assert_eq!(dev, dec!(-0.02));

        let (dev, boundary) = boundary_deviation(dec!(1.029), dec!(0.95), dec!(1.05));
        assert_eq!(boundary, Some(Boundary::Upper));
        assert_eq!(dev, dec!(0.02));
    }

    #[test]
    fn test_deviation_without_range() {
        assert_eq!(
            boundary_deviation(dec!(1), Decimal::ZERO, Decimal::ZERO),
            (Decimal::ZERO, None)
        );
    }

    #[test]
    fn test_report_flags_out_of_range() {
        let report = StatusReport::build(&active(), dec!(1.10), dec!(500), HedgeSizeSource::Venue);
        assert!(!report.in_range);
        assert_eq!(report.nearest_boundary, Some(Boundary::Upper));
        assert_eq!(report.net_delta, Decimal::ZERO);
        assert!(report.render().contains("OUT OF RANGE"));
    }

    #[test]
    fn test_report_marks_recorded_hedge_size() {
        let report =
            StatusReport::build(&active(), dec!(1.00), dec!(500), HedgeSizeSource::Recorded);
        assert!(report.in_range);
        assert!(report.render().contains("recorded"));
    }
}
