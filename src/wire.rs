// ===============================
// src/wire.rs
// ===============================
//
// Helper signer + model JSON untuk REST/WS simulator remote.
// Harga di wire berupa desimal; di domain dikonversi ke tick (x100, round).
//
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::broker::BrokerError;
use crate::domain::{
    BestPrice, Order, OrderBookEntry, OrderStatus, OrderType, PortfolioItem, PortfolioSummary,
};

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn sign_query(secret: &str, query: &str) -> String {
    // HMAC menerima key dengan panjang berapa pun
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn to_ticks(px: f64) -> i64 {
    (px * 100.0).round() as i64
}

pub fn from_ticks(ticks: i64) -> f64 {
    ticks as f64 / 100.0
}

/// Parse a decimal string the way the stream sends it ("101.2500").
pub fn parse_ticks(s: &str) -> Option<i64> {
    s.trim().parse::<f64>().ok().map(to_ticks)
}

#[derive(Debug, Deserialize)]
pub struct WireTime {
    pub last_trade_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct WireSession {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct WireBestPrice {
    pub bid_price: f64,
    pub ask_price: f64,
}

impl From<WireBestPrice> for BestPrice {
    fn from(w: WireBestPrice) -> Self {
        BestPrice { bid: to_ticks(w.bid_price), ask: to_ticks(w.ask_price) }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireBookEntry {
    pub price: f64,
    pub size: i64,
}

impl From<WireBookEntry> for OrderBookEntry {
    fn from(w: WireBookEntry) -> Self {
        OrderBookEntry { price: to_ticks(w.price), size: w.size }
    }
}

#[derive(Debug, Deserialize)]
pub struct WirePortfolioItem {
    pub symbol: String,
    pub long_shares: i64,
    pub short_shares: i64,
    pub shares: i64,
    pub price: f64,
    pub realized_pl: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<WirePortfolioItem> for PortfolioItem {
    fn from(w: WirePortfolioItem) -> Self {
        PortfolioItem {
            symbol: w.symbol,
            long_shares: w.long_shares,
            short_shares: w.short_shares,
            shares: w.shares,
            price: to_ticks(w.price),
            realized_pl: to_ticks(w.realized_pl),
            timestamp: w.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireSummary {
    pub total_bp: f64,
    pub total_shares: i64,
    pub total_realized_pl: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<WireSummary> for PortfolioSummary {
    fn from(w: WireSummary) -> Self {
        PortfolioSummary {
            total_bp: to_ticks(w.total_bp),
            total_shares: w.total_shares,
            total_realized_pl: to_ticks(w.total_realized_pl),
            timestamp: w.timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireOrder {
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub price: f64,
    pub size: i64,
    #[serde(default)]
    pub executed_size: i64,
    #[serde(default)]
    pub executed_price: f64,
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

pub fn parse_order_type(s: &str) -> Result<OrderType, BrokerError> {
    match s {
        "MARKET_BUY" => Ok(OrderType::MarketBuy),
        "MARKET_SELL" => Ok(OrderType::MarketSell),
        "LIMIT_BUY" => Ok(OrderType::LimitBuy),
        "LIMIT_SELL" => Ok(OrderType::LimitSell),
        other => Err(BrokerError::Decode(format!("unknown order type {other}"))),
    }
}

pub fn parse_status(s: &str) -> OrderStatus {
    match s {
        "PENDING_NEW" => OrderStatus::PendingNew,
        "NEW" | "" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "PENDING_CANCEL" => OrderStatus::PendingCancel,
        "CANCELED" => OrderStatus::Canceled,
        other => OrderStatus::Rejected(other.to_string()),
    }
}

impl TryFrom<WireOrder> for Order {
    type Error = BrokerError;

    fn try_from(w: WireOrder) -> Result<Self, Self::Error> {
        let order_type = parse_order_type(&w.order_type)?;
        let price = if order_type.is_limit() { Some(to_ticks(w.price)) } else { None };
        Ok(Order {
            order_type,
            symbol: w.symbol,
            size: w.size,
            price,
            id: w.id,
            executed_size: w.executed_size,
            executed_price: to_ticks(w.executed_price),
            status: parse_status(&w.status),
            timestamp: w.timestamp,
        })
    }
}

impl From<&Order> for WireOrder {
    fn from(o: &Order) -> Self {
        WireOrder {
            symbol: o.symbol.clone(),
            order_type: o.order_type.as_str().to_string(),
            price: o.price.map(from_ticks).unwrap_or(0.0),
            size: o.size,
            executed_size: o.executed_size,
            executed_price: from_ticks(o.executed_price),
            id: o.id.clone(),
            status: o.status.as_str().to_string(),
            timestamp: o.timestamp,
        }
    }
}

// --- Model minimal untuk stream best price ---
#[derive(Debug, Deserialize)]
pub struct WsBookTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid: String,
    #[serde(rename = "a")]
    pub ask: String,
}

impl WsBookTicker {
    pub fn best_price(&self) -> Option<BestPrice> {
        let bid = parse_ticks(&self.bid)?;
        let ask = parse_ticks(&self.ask)?;
        if bid > 0 && ask > 0 { Some(BestPrice { bid, ask }) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_hex() {
        let a = sign_query("secret", "symbol=BA&timestamp=1");
        let b = sign_query("secret", "symbol=BA&timestamp=1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign_query("other", "symbol=BA&timestamp=1"));
    }

    #[test]
    fn query_values_are_escaped() {
        let q = encode_query(&[("symbol", "BRK B".to_string()), ("size", "5".to_string())]);
        assert_eq!(q, "symbol=BRK%20B&size=5");
    }

    #[test]
    fn decodes_orders() {
        let raw = r#"{"symbol":"BA","type":"LIMIT_BUY","price":101.25,"size":5,
            "executed_size":2,"executed_price":101.25,"id":"CL-1","status":"PARTIALLY_FILLED",
            "timestamp":"2024-03-01T14:30:00Z"}"#;
        let w: WireOrder = serde_json::from_str(raw).unwrap();
        let o = Order::try_from(w).unwrap();
        assert_eq!(o.order_type, OrderType::LimitBuy);
        assert_eq!(o.price, Some(10125));
        assert_eq!(o.executed_size, 2);
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn unknown_order_type_is_a_decode_error() {
        let raw = r#"{"symbol":"BA","type":"STOP","size":1,"id":"x","timestamp":"2024-03-01T14:30:00Z"}"#;
        let w: WireOrder = serde_json::from_str(raw).unwrap();
        assert!(matches!(Order::try_from(w), Err(BrokerError::Decode(_))));
    }

    #[test]
    fn book_ticker_to_best_price() {
        let t: WsBookTicker = serde_json::from_str(r#"{"s":"KO","b":"60.1200","a":"60.1500"}"#).unwrap();
        assert_eq!(t.best_price(), Some(BestPrice { bid: 6012, ask: 6015 }));
        let empty: WsBookTicker = serde_json::from_str(r#"{"s":"KO","b":"0","a":"60.15"}"#).unwrap();
        assert_eq!(empty.best_price(), None);
    }
}
