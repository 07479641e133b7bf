//! Binance USDⓈ-M futures REST client.

use crate::config::BinanceConfig;
use crate::error::HedgeError;
use crate::exchange::traits::PriceOracle;
use crate::exchange::types::*;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Binance API client for the futures market.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    futures_base_url: String,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig) -> Result<Self> {
        let base_url = if config.testnet {
            FUTURES_TESTNET_URL
        } else {
            FUTURES_BASE_URL
        };
        Self::with_base_url(config, base_url)
    }

    /// Create a client against an explicit base URL.
    pub fn with_base_url(config: &BinanceConfig, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            futures_base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Decode a response, surfacing Binance error bodies.
    async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            match serde_json::from_str::<ApiError>(&body) {
                Ok(api_error) => bail!(
                    "{} rejected ({}): code {} {}",
                    what,
                    status,
                    api_error.code,
                    api_error.msg
                ),
                Err(_) => bail!("{} failed ({}): {}", what, status, body),
            }
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    // ==================== Market Data (Public) ====================

    /// Get the latest price for a symbol.
    #[instrument(skip(self))]
    pub async fn get_ticker_price(&self, symbol: &str) -> Result<TickerPrice> {
        let url = format!(
            "{}/fapi/v1/ticker/price?symbol={}",
            self.futures_base_url,
            urlencoding::encode(symbol)
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to fetch ticker price")?;

        Self::parse(response, "ticker price").await
    }

    // ==================== Account (Authenticated) ====================

    /// Get current positions for a symbol.
    #[instrument(skip(self))]
    pub async fn get_positions(&self, symbol: &str) -> Result<Vec<FuturesPosition>> {
        let timestamp = Self::timestamp();
        let query = format!("symbol={}&timestamp={}", urlencoding::encode(symbol), timestamp);
        let signature = self.sign(&query);

        let url = format!(
            "{}/fapi/v2/positionRisk?{}&signature={}",
            self.futures_base_url, query, signature
        );

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to fetch positions")?;

        Self::parse(response, "positions").await
    }

    // ==================== Orders (Authenticated) ====================

    /// Place a new futures order, waiting for the fill result.
    #[instrument(skip(self))]
    pub async fn place_futures_order(&self, order: &NewOrder) -> Result<OrderResponse> {
        let timestamp = Self::timestamp();
        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), format!("{:?}", order.side).to_uppercase()),
            ("type".to_string(), format!("{:?}", order.order_type).to_uppercase()),
            ("newOrderRespType".to_string(), "RESULT".to_string()),
            ("timestamp".to_string(), timestamp.to_string()),
        ];

        if let Some(qty) = &order.quantity {
            params.push(("quantity".to_string(), qty.normalize().to_string()));
        }

        if let Some(reduce_only) = order.reduce_only {
            params.push(("reduceOnly".to_string(), reduce_only.to_string()));
        }

        if let Some(client_id) = &order.new_client_order_id {
            params.push(("newClientOrderId".to_string(), client_id.clone()));
        }

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&query_string);
        let url = format!(
            "{}/fapi/v1/order?{}&signature={}",
            self.futures_base_url, query_string, signature
        );

        debug!("Placing futures order: {:?}", order);

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("Failed to place futures order")?;

        Self::parse(response, "order").await
    }
}

#[async_trait]
impl PriceOracle for BinanceClient {
    async fn get_price(&self, pair_symbol: &str) -> crate::error::Result<Decimal> {
        let ticker = self
            .get_ticker_price(pair_symbol)
            .await
            .map_err(|e| HedgeError::Oracle(format!("{:#}", e)))?;

        if ticker.price <= Decimal::ZERO {
            return Err(HedgeError::Oracle(format!(
                "non-positive price {} for {}",
                ticker.price, pair_symbol
            )));
        }
        Ok(ticker.price)
    }
}
