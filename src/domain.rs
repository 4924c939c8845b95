// ===============================
// src/domain.rs
// ===============================
//
// Skala domain:
// - Harga dalam "tick" 0.01 (i64), mis. 101.25 -> 10125.
// - Ukuran order dalam lot (1 lot = 100 saham).
// - Posisi portfolio dalam saham.
//
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const LOT_SIZE: i64 = 100;

/// Convert a share count into whole lots (floor division, like the broker expects).
pub fn shares_to_lots(shares: i64) -> i64 {
    shares / LOT_SIZE
}

/// Format ticks as a decimal price string (2 decimals).
pub fn fmt_px(ticks: i64) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let abs = ticks.abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType { MarketBuy, MarketSell, LimitBuy, LimitSell }

impl OrderType {
    pub fn is_buy(&self) -> bool { matches!(self, OrderType::MarketBuy | OrderType::LimitBuy) }
    pub fn is_limit(&self) -> bool { matches!(self, OrderType::LimitBuy | OrderType::LimitSell) }
    pub fn sign(&self) -> i64 { if self.is_buy() { 1 } else { -1 } }
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::MarketBuy => "MARKET_BUY",
            OrderType::MarketSell => "MARKET_SELL",
            OrderType::LimitBuy => "LIMIT_BUY",
            OrderType::LimitSell => "LIMIT_SELL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus { PendingNew, New, PartiallyFilled, Filled, PendingCancel, Canceled, Rejected(String) }

impl OrderStatus {
    /// Still resting on the book (counts toward the waiting list).
    pub fn is_open(&self) -> bool { matches!(self, OrderStatus::PendingNew | OrderStatus::New | OrderStatus::PartiallyFilled) }
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::PendingNew => "PENDING_NEW",
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected(_) => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_type: OrderType,
    pub symbol: String,
    /// lots
    pub size: i64,
    /// ticks; None for market orders
    pub price: Option<i64>,
    pub id: String,
    pub executed_size: i64,
    pub executed_price: i64,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

impl Order {
    pub fn new(order_type: OrderType, symbol: &str, size: i64, price: Option<i64>) -> Self {
        let now = Utc::now();
        // cl_id unik per order, sama seperti pola CL-<ns>-<rand>
        let id = format!(
            "CL-{}-{}",
            now.timestamp_nanos_opt().unwrap_or(0),
            rand::thread_rng().gen::<u32>()
        );
        Self {
            order_type,
            symbol: symbol.to_string(),
            size,
            price,
            id,
            executed_size: 0,
            executed_price: 0,
            status: OrderStatus::PendingNew,
            timestamp: now,
        }
    }

    pub fn market_buy(symbol: &str, lots: i64) -> Self { Self::new(OrderType::MarketBuy, symbol, lots, None) }
    pub fn market_sell(symbol: &str, lots: i64) -> Self { Self::new(OrderType::MarketSell, symbol, lots, None) }
    pub fn limit_buy(symbol: &str, lots: i64, px: i64) -> Self { Self::new(OrderType::LimitBuy, symbol, lots, Some(px)) }
    pub fn limit_sell(symbol: &str, lots: i64, px: i64) -> Self { Self::new(OrderType::LimitSell, symbol, lots, Some(px)) }

    pub fn remaining(&self) -> i64 { self.size - self.executed_size }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub symbol: String,
    pub long_shares: i64,
    pub short_shares: i64,
    /// net = long - short
    pub shares: i64,
    /// average price (ticks)
    pub price: i64,
    /// realized P&L (ticks x shares, i.e. cents)
    pub realized_pl: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_bp: i64,
    pub total_shares: i64,
    pub total_realized_pl: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestPrice { pub bid: i64, pub ask: i64 }

impl BestPrice {
    pub fn spread(&self) -> i64 { self.ask - self.bid }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBookType { GlobalBid, GlobalAsk }

impl OrderBookType {
    pub fn is_bid(&self) -> bool { matches!(self, OrderBookType::GlobalBid) }
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderBookType::GlobalBid => "global_bid",
            OrderBookType::GlobalAsk => "global_ask",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookEntry { pub price: i64, pub size: i64 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage { Buy, Sell }

// Journal events (JSONL)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Order(Order),
    Cancel { id: String, symbol: String },
    Stage { symbol: String, stage: Stage, cycle: u32 },
    Flatten { symbol: String, long_shares: i64, short_shares: i64 },
    Pnl { symbol: String, delta: i64 },
    Note(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lots_are_floored() {
        assert_eq!(shares_to_lots(500), 5);
        assert_eq!(shares_to_lots(199), 1);
        assert_eq!(shares_to_lots(99), 0);
    }

    #[test]
    fn formats_ticks() {
        assert_eq!(fmt_px(10125), "101.25");
        assert_eq!(fmt_px(5), "0.05");
        assert_eq!(fmt_px(-250), "-2.50");
    }

    #[test]
    fn client_ids_are_unique() {
        let a = Order::limit_buy("BA", 1, 100_00);
        let b = Order::limit_buy("BA", 1, 100_00);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("CL-"));
        assert_eq!(a.status, OrderStatus::PendingNew);
    }
}
