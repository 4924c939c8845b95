// ===============================
// src/report.rs (console tables)
// ===============================
use crate::broker::{Broker, BrokerError};
use crate::domain::{fmt_px, Order, OrderBookEntry, OrderBookType, PortfolioItem, PortfolioSummary};

const BOOK_DEPTH: usize = 99;

/// Size-weighted median level: first price where cumulative size reaches
/// half of the side's total size. 0 for an empty side.
pub fn book_median(levels: &[OrderBookEntry]) -> i64 {
    let half = levels.iter().map(|l| l.size).sum::<i64>() / 2;
    let mut cum = 0;
    for l in levels {
        cum += l.size;
        if half <= cum {
            return l.price;
        }
    }
    0
}

/// (bid median, ask median) over the global book.
pub async fn order_book_medians(broker: &dyn Broker, symbol: &str) -> Result<(i64, i64), BrokerError> {
    let bids = broker.order_book(symbol, OrderBookType::GlobalBid, BOOK_DEPTH).await?;
    let asks = broker.order_book(symbol, OrderBookType::GlobalAsk, BOOK_DEPTH).await?;
    Ok((book_median(&bids), book_median(&asks)))
}

pub fn summary_table(s: &PortfolioSummary) -> String {
    format!(
        "Buying Power\tTotal Shares\tTotal P&L\tTimestamp\n{:>12}\t{:>12}\t{:>9}\t{:>26}",
        fmt_px(s.total_bp),
        s.total_shares,
        fmt_px(s.total_realized_pl),
        s.timestamp.to_rfc3339(),
    )
}

pub fn item_row(item: &PortfolioItem) -> String {
    format!(
        "{:>6}\t\t{:>6}\t{:>9}\t{:>7}\t\t{:>26}",
        item.symbol,
        item.shares,
        fmt_px(item.price),
        fmt_px(item.realized_pl),
        item.timestamp.to_rfc3339(),
    )
}

pub fn items_table(items: &[PortfolioItem]) -> String {
    let mut out = String::from("Symbol\t\tShares\t\tPrice\t\tP&L\t\tTimestamp");
    for item in items {
        out.push('\n');
        out.push_str(&item_row(item));
    }
    out
}

pub fn order_row(o: &Order) -> String {
    format!(
        "{:>6}\t{:>16}\t{:>7}\t\t{:>4}\t\t{:>4}\t{:>36}\t{:>23}\t\t{:>26}",
        o.symbol,
        o.order_type.as_str(),
        fmt_px(o.executed_price),
        o.size,
        o.executed_size,
        o.id,
        o.status.as_str(),
        o.timestamp.to_rfc3339(),
    )
}

pub fn orders_table(orders: &[Order]) -> String {
    let mut out = String::from("Symbol\tType\t  Price\t\tSize\tExecuted\tID\tStatus\t\tTimestamp");
    for o in orders {
        out.push('\n');
        out.push_str(&order_row(o));
    }
    out
}

pub async fn print_current_portfolio(broker: &dyn Broker) -> Result<(), BrokerError> {
    println!("{}", summary_table(&broker.portfolio_summary().await?));
    Ok(())
}

pub async fn print_portfolio_items(broker: &dyn Broker) -> Result<(), BrokerError> {
    println!("{}", items_table(&broker.portfolio_items().await?));
    Ok(())
}

pub async fn print_portfolio(broker: &dyn Broker, ticker: &str) -> Result<(), BrokerError> {
    println!("{}", item_row(&broker.portfolio_item(ticker).await?));
    Ok(())
}

pub async fn print_waiting_orders(broker: &dyn Broker) -> Result<(), BrokerError> {
    println!("{}", orders_table(&broker.waiting_list().await?));
    Ok(())
}

pub async fn print_submitted_orders(broker: &dyn Broker) -> Result<(), BrokerError> {
    println!("submitted orders");
    println!("{}", orders_table(&broker.submitted_orders().await?));
    Ok(())
}

/// Execution rows for every submitted order that has at least one fill.
pub async fn print_executions(broker: &dyn Broker) -> Result<(), BrokerError> {
    println!("executions");
    for o in broker.submitted_orders().await? {
        for ex in broker.executed_orders(&o.id).await? {
            println!("{}", order_row(&ex));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lvl(price: i64, size: i64) -> OrderBookEntry {
        OrderBookEntry { price, size }
    }

    #[test]
    fn median_is_first_level_covering_half_the_size() {
        let bids = [lvl(100_00, 2), lvl(99_99, 2), lvl(99_98, 6)];
        // total 10, half 5 -> cum 2, 4, 10
        assert_eq!(book_median(&bids), 99_98);
        let asks = [lvl(100_04, 8), lvl(100_05, 1)];
        assert_eq!(book_median(&asks), 100_04);
    }

    #[test]
    fn median_of_empty_side_is_zero() {
        assert_eq!(book_median(&[]), 0);
    }

    #[test]
    fn order_table_has_one_row_per_order() {
        let orders = vec![Order::limit_buy("BA", 1, 100_00), Order::market_sell("BA", 2)];
        let table = orders_table(&orders);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("LIMIT_BUY"));
        assert!(table.contains("MARKET_SELL"));
    }

    #[test]
    fn item_row_formats_prices() {
        let item = PortfolioItem {
            symbol: "KO".into(),
            shares: 200,
            long_shares: 200,
            price: 60_15,
            realized_pl: -12_50,
            timestamp: Utc::now(),
            ..PortfolioItem::default()
        };
        let row = item_row(&item);
        assert!(row.contains("60.15"));
        assert!(row.contains("-12.50"));
    }
}
