//! Type definitions for Binance futures API requests and responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest price for a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerPrice {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(default)]
    pub time: Option<i64>,
}

/// Futures position information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesPosition {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(
        rename = "unRealizedProfit",
        default,
        with = "rust_decimal::serde::str_option"
    )]
    pub unrealized_profit: Option<Decimal>,
    pub position_side: PositionSide,
}

/// Position side (long, short, or both for one-way mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    ExpiredInMatch,
}

impl OrderStatus {
    /// Whether the order ended without any chance of (further) fills.
    pub fn is_dead(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Expired | OrderStatus::ExpiredInMatch
        )
    }
}

/// New order request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub reduce_only: Option<bool>,
    pub new_client_order_id: Option<String>,
}

/// Order response from the exchange.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub client_order_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub update_time: i64,
}

/// Error body returned by Binance on a rejected request.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_order_response() {
        let body = r#"{
            "orderId": 42,
            "symbol": "SUIUSDC",
            "status": "FILLED",
            "clientOrderId": "abc",
            "price": "0",
            "avgPrice": "1.0012",
            "origQty": "500.0",
            "executedQty": "500.0",
            "side": "SELL",
            "type": "MARKET",
            "timeInForce": "GTC",
            "updateTime": 1700000000000
        }"#;

        let order: OrderResponse = serde_json::from_str(body).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.executed_qty, dec!(500));
        assert_eq!(order.side, OrderSide::Sell);
    }

    #[test]
    fn test_parse_short_position() {
        let body = r#"[{
            "symbol": "SUIUSDC",
            "positionAmt": "-500.0",
            "entryPrice": "1.0",
            "markPrice": "1.01",
            "unRealizedProfit": "-5.0",
            "positionSide": "BOTH"
        }]"#;

        let positions: Vec<FuturesPosition> = serde_json::from_str(body).unwrap();
        assert_eq!(positions[0].position_amt, dec!(-500));
        assert_eq!(positions[0].position_side, PositionSide::Both);
    }
}
