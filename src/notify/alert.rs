//! Structured alerts for faults and lifecycle events.

use super::escape_markdown;
use crate::position::{FaultRecord, LegState, Position};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Get display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "ℹ️",
            AlertSeverity::Warning => "⚠️",
            AlertSeverity::Error => "❌",
            AlertSeverity::Critical => "🚨",
        }
    }
}

/// A human-readable alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Build the alert for a `Faulted` transition.
    ///
    /// Names the failed leg and the last committed amounts. Severity follows
    /// exposure: unknown or unhedged legs are critical, idle capital is a warning.
    pub fn for_fault(position: &Position, fault: &FaultRecord) -> Self {
        let (severity, title) = match fault.legs {
            LegState::Unknown => (
                AlertSeverity::Critical,
                "Position FAULTED - leg state unknown",
            ),
            LegState::Unhedged => (
                AlertSeverity::Critical,
                "Position FAULTED - pool leg UNHEDGED",
            ),
            LegState::Closed => (AlertSeverity::Warning, "Position FAULTED - capital idle"),
        };

        let action = match fault.legs {
            LegState::Unknown => "Reconcile pool and venue manually before recovering",
            LegState::Unhedged => {
                "Open the hedge manually or withdraw the pool leg; no automatic retry"
            }
            LegState::Closed => "Both legs closed; run `recover` to redeploy",
        };

        let message = format!(
            "Failed step: {} ({} leg)\nError: {}\n\
             Pool leg: {} | {} pool asset / {} paired asset in \\[{}, {}]\n\
             Hedge leg: {} | short {}\nAction: {}",
            fault.step,
            fault.step.leg(),
            escape_markdown(&fault.error),
            leg_label(position.pool_handle.is_some()),
            fmt_amount(position.pool_asset_amount),
            fmt_amount(position.paired_asset_amount),
            fmt_amount(position.lower_price),
            fmt_amount(position.upper_price),
            leg_label(position.hedge_order_ref.is_some()),
            fmt_amount(position.hedge_size),
            action,
        );

        Self::new(severity, title, message)
    }

    /// Text sent to the notifier.
    pub fn render(&self) -> String {
        format!(
            "{} *{}* \\[{}]\n{}",
            self.severity.icon(),
            self.title,
            self.severity.as_str(),
            self.message
        )
    }

    /// Emit alert as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Info => info!(target: "hedge_alert", "HEDGE_ALERT: {}", json),
            AlertSeverity::Warning => warn!(target: "hedge_alert", "HEDGE_ALERT: {}", json),
            AlertSeverity::Error => error!(target: "hedge_alert", "HEDGE_ALERT: {}", json),
            AlertSeverity::Critical => error!(target: "hedge_alert", "HEDGE_ALERT: {}", json),
        }
    }
}

fn leg_label(open: bool) -> &'static str {
    if open {
        "OPEN"
    } else {
        "closed"
    }
}

fn fmt_amount(value: Decimal) -> String {
    value.round_dp(6).normalize().to_string()
}
