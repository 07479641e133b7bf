//! Alert and report delivery.
//!
//! `AlertSink` is fire-and-forget from the controller's point of view: a failed
//! delivery is logged locally and never rolls back a position change.

mod alert;
mod telegram;

pub use alert::{Alert, AlertSeverity};
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Alert delivery failure.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert transport error: {0}")]
    Transport(String),

    #[error("Alert rejected by notifier: {0}")]
    Rejected(String),
}

/// Destination for human-readable alerts and reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), AlertError>;
}

/// Escape Telegram Markdown control characters in free text.
///
/// Error strings and labels carry underscores (`remove_liquidity`) that would
/// otherwise open an unterminated italic entity.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Sink that writes messages to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, message: &str) -> Result<(), AlertError> {
        info!(target: "hedge_notify", "{}", message);
        Ok(())
    }
}
