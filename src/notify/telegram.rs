//! Telegram bot notifier.

use super::{AlertError, AlertSink};
use crate::config::TelegramConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Delivers alerts and reports to a Telegram chat.
pub struct TelegramNotifier {
    http: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Self::with_api_url(config, TELEGRAM_API_URL)
    }

    /// Create a notifier against an explicit Bot API base URL.
    pub fn with_api_url(config: &TelegramConfig, api_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl AlertSink for TelegramNotifier {
    #[instrument(skip(self, message))]
    async fn notify(&self, message: &str) -> std::result::Result<(), AlertError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "Markdown",
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        let parsed: TelegramResponse = response
            .json()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        if !parsed.ok {
            return Err(AlertError::Rejected(
                parsed.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        debug!(chat_id = %self.chat_id, "Telegram message delivered");
        Ok(())
    }
}
