// ===============================
// src/broker.rs
// ===============================
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{BestPrice, Order, OrderBookEntry, OrderBookType, PortfolioItem, PortfolioSummary};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker session not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BrokerError::Decode(e.to_string())
        } else {
            BrokerError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Request/response client for the market simulator.
///
/// One `Arc<dyn Broker>` is shared by every ticker task, so implementations
/// must accept concurrent calls from any number of tasks (`Send + Sync`).
/// Mutating calls return once the request is accepted; fills and
/// cancellations are observed later through the query calls.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, creds: &Credentials) -> Result<(), BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;
    async fn subscribe_all_order_books(&self) -> Result<(), BrokerError>;

    async fn last_trade_time(&self) -> Result<DateTime<Utc>, BrokerError>;
    async fn best_price(&self, symbol: &str) -> Result<BestPrice, BrokerError>;
    async fn order_book(
        &self,
        symbol: &str,
        side: OrderBookType,
        max_level: usize,
    ) -> Result<Vec<OrderBookEntry>, BrokerError>;

    async fn portfolio_item(&self, symbol: &str) -> Result<PortfolioItem, BrokerError>;
    async fn portfolio_items(&self) -> Result<Vec<PortfolioItem>, BrokerError>;
    async fn portfolio_summary(&self) -> Result<PortfolioSummary, BrokerError>;

    async fn waiting_list(&self) -> Result<Vec<Order>, BrokerError>;
    async fn submitted_orders(&self) -> Result<Vec<Order>, BrokerError>;
    /// Every execution recorded against `order_id`, oldest first.
    async fn executed_orders(&self, order_id: &str) -> Result<Vec<Order>, BrokerError>;

    async fn submit_order(&self, order: &Order) -> Result<(), BrokerError>;
    async fn submit_cancellation(&self, order: &Order) -> Result<(), BrokerError>;
}
