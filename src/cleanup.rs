// ===============================
// src/cleanup.rs (cancel sweep & flatten)
// ===============================
use ahash::AHashSet as HashSet;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::broker::{Broker, BrokerError};
use crate::domain::{shares_to_lots, Event, Order};
use crate::metrics::{CANCELS, ORDERS_SUBMITTED};
use crate::recorder::EventSink;

/// Empty filter matches every symbol.
fn matches(filter: &str, order: &Order) -> bool {
    filter.is_empty() || order.symbol == filter
}

/// One cancellation attempt; a failure is logged and skipped, never retried.
async fn cancel_one(broker: &dyn Broker, order: &Order, settle: Duration, sink: &EventSink) -> bool {
    let accepted = match broker.submit_cancellation(order).await {
        Ok(()) => {
            CANCELS.with_label_values(&[&order.symbol]).inc();
            sink.emit(Event::Cancel { id: order.id.clone(), symbol: order.symbol.clone() });
            true
        }
        Err(e) => {
            warn!(?e, symbol = %order.symbol, order_id = %order.id, "cancellation failed, skipped");
            false
        }
    };
    // broker butuh waktu untuk memproses cancel, berhasil atau tidak
    sleep(settle).await;
    accepted
}

/// Cancel every waiting order for `ticker` ("" = all). Returns how many were sent.
pub async fn cancel_orders(
    broker: &dyn Broker,
    ticker: &str,
    settle: Duration,
    sink: &EventSink,
) -> Result<usize, BrokerError> {
    let mut sent = 0;
    for order in broker.waiting_list().await?.iter().filter(|o| matches(ticker, o)) {
        if cancel_one(broker, order, settle, sink).await {
            sent += 1;
        }
    }
    Ok(sent)
}

/// Waiting-list sweep followed by a sweep of still-open submitted orders
/// the first pass did not see.
pub async fn cancel_all_orders(
    broker: &dyn Broker,
    ticker: &str,
    settle: Duration,
    sink: &EventSink,
) -> Result<usize, BrokerError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut sent = 0;
    for order in broker.waiting_list().await?.iter().filter(|o| matches(ticker, o)) {
        seen.insert(order.id.clone());
        if cancel_one(broker, order, settle, sink).await {
            sent += 1;
        }
    }
    for order in broker
        .submitted_orders()
        .await?
        .iter()
        .filter(|o| matches(ticker, o) && o.status.is_open() && !seen.contains(&o.id))
    {
        if cancel_one(broker, order, settle, sink).await {
            sent += 1;
        }
    }
    Ok(sent)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flatten {
    pub sold_lots: i64,
    pub bought_lots: i64,
}

/// Offset long and short shares with market orders. Fills are not verified:
/// thin liquidity or missing buying power can leave a residual position.
pub async fn close_positions(
    broker: &dyn Broker,
    ticker: &str,
    settle: Duration,
    sink: &EventSink,
) -> Result<Flatten, BrokerError> {
    info!(symbol = %ticker, "running close positions");
    let item = broker.portfolio_item(ticker).await?;
    sink.emit(Event::Flatten {
        symbol: ticker.to_string(),
        long_shares: item.long_shares,
        short_shares: item.short_shares,
    });

    let mut out = Flatten::default();

    let long_lots = shares_to_lots(item.long_shares);
    if long_lots > 0 {
        info!(symbol = %ticker, long_shares = item.long_shares, "market selling long position");
        let order = Order::market_sell(ticker, long_lots);
        submit(broker, &order, sink).await?;
        out.sold_lots = long_lots;
        sleep(settle).await;
    }

    let short_lots = shares_to_lots(item.short_shares);
    if short_lots > 0 {
        info!(symbol = %ticker, short_shares = item.short_shares, "market buying short position");
        let order = Order::market_buy(ticker, short_lots);
        submit(broker, &order, sink).await?;
        out.bought_lots = short_lots;
        sleep(settle).await;
    }

    Ok(out)
}

/// Submit + count + journal.
pub async fn submit(broker: &dyn Broker, order: &Order, sink: &EventSink) -> Result<(), BrokerError> {
    broker.submit_order(order).await?;
    ORDERS_SUBMITTED.with_label_values(&[&order.symbol, order.order_type.as_str()]).inc();
    sink.emit(Event::Order(order.clone()));
    Ok(())
}
