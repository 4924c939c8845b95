// ===============================
// src/strategy.rs
// ===============================
//
// Strategi ladder per ticker, dua stage:
//   Buy  : flatten posisi net long, cancel order yang masih menunggu, pasang
//          limit buy (ladder 1-lot di dalam spread, atau satu order di ask).
//   Sell : ambil eksekusi tiap limit buy, jual delta yang belum dijual di ask.
//          Setelah `max_sell_cycles` putaran atau seluruh size terjual -> Buy.
//
// Satu task per ticker; state dimiliki penuh oleh task itu sendiri.
//
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::cleanup::{self, Flatten};
use crate::domain::{fmt_px, shares_to_lots, BestPrice, Event, Order, Stage};
use crate::metrics::{PNL_DELTA, STAGE_TRANSITIONS};
use crate::recorder::EventSink;
use crate::report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Variant {
    /// `order_size` one-lot limit buys spread across the bid/ask gap
    Ladder,
    /// a single limit buy of `order_size` lots at the best ask
    Single,
}

/// How executions are totalled during the sell stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FillAccounting {
    /// sum of every execution of every tracked buy
    Cumulative,
    /// only the most recent execution counts (assignment instead of accumulation)
    LastExecution,
}

#[derive(Debug, Clone)]
pub struct StrategyParams {
    /// lots per buy cycle
    pub order_size: i64,
    pub max_sell_cycles: u32,
    pub check_freq: Duration,
    /// pause after each mutating call so the broker can process it
    pub settle: Duration,
    pub variant: Variant,
    pub accounting: FillAccounting,
    pub trace_book: bool,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            order_size: 5,
            max_sell_cycles: 10,
            check_freq: Duration::from_secs(1),
            settle: Duration::from_secs(1),
            variant: Variant::Ladder,
            accounting: FillAccounting::Cumulative,
            trace_book: false,
        }
    }
}

/// Limit buys for one cycle, priced off the current quote.
pub fn buy_orders(symbol: &str, best: BestPrice, params: &StrategyParams) -> Vec<Order> {
    match params.variant {
        Variant::Ladder => {
            let spread = best.spread();
            (0..params.order_size)
                .map(|i| Order::limit_buy(symbol, 1, best.bid + i * spread / 10))
                .collect()
        }
        Variant::Single => vec![Order::limit_buy(symbol, params.order_size, best.ask)],
    }
}

pub struct TickerStrategy {
    symbol: String,
    params: StrategyParams,
    sink: EventSink,
    stage: Stage,
    limit_buys: Vec<Order>,
    sold_lots: i64,
    executed_lots: i64,
    sell_cycle: u32,
    buy_cycles: u32,
    total_sold: i64,
}

impl TickerStrategy {
    pub fn new(symbol: &str, params: StrategyParams, sink: EventSink) -> Self {
        Self {
            symbol: symbol.to_string(),
            params,
            sink,
            stage: Stage::Buy,
            limit_buys: Vec::new(),
            sold_lots: 0,
            executed_lots: 0,
            sell_cycle: 0,
            buy_cycles: 0,
            total_sold: 0,
        }
    }

    pub fn stage(&self) -> Stage { self.stage }
    pub fn sold_lots(&self) -> i64 { self.sold_lots }
    pub fn executed_lots(&self) -> i64 { self.executed_lots }
    pub fn sell_cycle(&self) -> u32 { self.sell_cycle }
    pub fn buy_cycles(&self) -> u32 { self.buy_cycles }
    pub fn limit_buys(&self) -> &[Order] { &self.limit_buys }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        let label = match stage { Stage::Buy => "buy", Stage::Sell => "sell" };
        STAGE_TRANSITIONS.with_label_values(&[&self.symbol, label]).inc();
        info!(symbol = %self.symbol, stage = label, cycle = self.buy_cycles, "stage transition");
        self.sink.emit(Event::Stage { symbol: self.symbol.clone(), stage, cycle: self.buy_cycles });
    }

    /// One iteration of the loop.
    pub async fn step(&mut self, broker: &dyn Broker) -> Result<(), BrokerError> {
        let best = broker.best_price(&self.symbol).await?;
        if self.params.trace_book {
            let (bid_med, ask_med) = report::order_book_medians(broker, &self.symbol).await?;
            debug!(symbol = %self.symbol, bid = %fmt_px(best.bid), ask = %fmt_px(best.ask),
                bid_median = %fmt_px(bid_med), ask_median = %fmt_px(ask_med), "book");
        }
        match self.stage {
            Stage::Buy => self.buy_stage(broker, best).await,
            Stage::Sell => self.sell_stage(broker, best).await,
        }
    }

    async fn buy_stage(&mut self, broker: &dyn Broker, best: BestPrice) -> Result<(), BrokerError> {
        let item = broker.portfolio_item(&self.symbol).await?;
        let lots = shares_to_lots(item.shares);
        if lots > 0 {
            let order = Order::market_sell(&self.symbol, lots);
            cleanup::submit(broker, &order, &self.sink).await?;
            warn!(symbol = %self.symbol, shares = item.shares, avg_px = %fmt_px(item.price),
                "leftover position flattened at market, likely loss");
        }

        cleanup::cancel_orders(broker, &self.symbol, self.params.settle, &self.sink).await?;

        self.limit_buys = buy_orders(&self.symbol, best, &self.params);
        for order in &self.limit_buys {
            debug!(symbol = %self.symbol, px = %fmt_px(order.price.unwrap_or_default()), lots = order.size, "limit buy");
            cleanup::submit(broker, order, &self.sink).await?;
        }

        self.sold_lots = 0;
        self.executed_lots = 0;
        self.sell_cycle = 0;
        self.buy_cycles += 1;
        self.enter(Stage::Sell);
        Ok(())
    }

    async fn sell_stage(&mut self, broker: &dyn Broker, best: BestPrice) -> Result<(), BrokerError> {
        let mut executed = 0;
        for buy in &self.limit_buys {
            for exec in broker.executed_orders(&buy.id).await? {
                executed = match self.params.accounting {
                    FillAccounting::Cumulative => executed + exec.executed_size,
                    FillAccounting::LastExecution => exec.executed_size,
                };
            }
        }
        self.executed_lots = executed;
        debug!(symbol = %self.symbol, sold = self.sold_lots, executed, cycle = self.sell_cycle, "sell check");

        if self.sold_lots < executed {
            let lots = executed - self.sold_lots;
            info!(symbol = %self.symbol, lots, px = %fmt_px(best.ask), "limit selling filled lots");
            let order = Order::limit_sell(&self.symbol, lots, best.ask);
            cleanup::submit(broker, &order, &self.sink).await?;
            self.sold_lots += lots;
            self.total_sold += lots;
        }
        self.sell_cycle += 1;

        if self.sell_cycle >= self.params.max_sell_cycles || self.sold_lots == self.params.order_size {
            self.enter(Stage::Buy);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TickerReport {
    pub symbol: String,
    pub pnl_delta: i64,
    pub buy_cycles: u32,
    pub sold_lots: i64,
    pub flatten: Flatten,
}

/// Run the loop until the broker clock reaches `end_time`, then cancel and
/// flatten this ticker and report the realized P&L change.
pub async fn run_ticker(
    broker: Arc<dyn Broker>,
    symbol: String,
    end_time: DateTime<Utc>,
    params: StrategyParams,
    sink: EventSink,
) -> Result<TickerReport, BrokerError> {
    let broker = broker.as_ref();
    let initial_pl = broker.portfolio_item(&symbol).await?.realized_pl;
    let settle = params.settle;

    let mut tick = interval(params.check_freq);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    let mut strat = TickerStrategy::new(&symbol, params, sink.clone());
    while broker.last_trade_time().await? < end_time {
        strat.step(broker).await?;
        tick.tick().await;
    }

    cleanup::cancel_orders(broker, &symbol, settle, &sink).await?;
    let flatten = cleanup::close_positions(broker, &symbol, settle, &sink).await?;

    let pnl_delta = broker.portfolio_item(&symbol).await?.realized_pl - initial_pl;
    PNL_DELTA.with_label_values(&[&symbol]).set(pnl_delta);
    sink.emit(Event::Pnl { symbol: symbol.clone(), delta: pnl_delta });
    println!("total profits/losses for {}: {}", symbol, fmt_px(pnl_delta));

    Ok(TickerReport {
        symbol,
        pnl_delta,
        buy_cycles: strat.buy_cycles(),
        sold_lots: strat.total_sold,
        flatten,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Credentials;
    use crate::domain::{OrderStatus, OrderType};
    use crate::sim::{SimBroker, SimConfig};

    fn calm() -> SimConfig {
        SimConfig { volatility_ticks: 0, ..SimConfig::default() }
    }

    async fn sim(s: SimBroker) -> SimBroker {
        s.connect(&Credentials::default()).await.unwrap();
        s
    }

    async fn true_executed(broker: &dyn Broker, strat: &TickerStrategy) -> i64 {
        let mut total = 0;
        for b in strat.limit_buys() {
            total += broker.executed_orders(&b.id).await.unwrap().iter().map(|e| e.executed_size).sum::<i64>();
        }
        total
    }

    #[test]
    fn ladder_spaces_one_lot_orders_across_the_spread() {
        let best = BestPrice { bid: 100_00, ask: 100_20 };
        let orders = buy_orders("BA", best, &StrategyParams::default());
        let px: Vec<i64> = orders.iter().map(|o| o.price.unwrap()).collect();
        assert_eq!(px, vec![100_00, 100_02, 100_04, 100_06, 100_08]);
        assert!(orders.iter().all(|o| o.size == 1 && o.order_type == OrderType::LimitBuy));
    }

    #[test]
    fn single_variant_buys_full_size_at_ask() {
        let params = StrategyParams { variant: Variant::Single, ..StrategyParams::default() };
        let orders = buy_orders("BA", BestPrice { bid: 100_00, ask: 100_20 }, &params);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].size, 5);
        assert_eq!(orders[0].price, Some(100_20));
    }

    #[tokio::test(start_paused = true)]
    async fn buy_stage_flattens_before_placing_the_ladder() {
        let broker = sim(SimBroker::new(calm()).with_position("CAT", 300, 99_00)).await;
        let mut strat = TickerStrategy::new("CAT", StrategyParams::default(), EventSink::disabled());

        strat.step(&broker).await.unwrap();
        assert_eq!(strat.stage(), Stage::Sell);

        let orders = broker.submitted_orders().await.unwrap();
        assert_eq!(orders[0].order_type, OrderType::MarketSell);
        assert_eq!(orders[0].size, 3);
        assert_eq!(orders.len(), 6);
        assert!(orders[1..].iter().all(|o| o.order_type == OrderType::LimitBuy));

        // ladder tidak menyilang ask, jadi posisi tetap nol
        assert_eq!(broker.portfolio_item("CAT").await.unwrap().shares, 0);
        assert_eq!(broker.waiting_list().await.unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn buy_stage_cancels_leftover_orders_for_its_ticker_only() {
        let broker = sim(SimBroker::new(calm())).await;
        broker.submit_order(&Order::limit_buy("GS", 1, 1)).await.unwrap();
        broker.submit_order(&Order::limit_buy("KO", 1, 1)).await.unwrap();

        let mut strat = TickerStrategy::new("GS", StrategyParams::default(), EventSink::disabled());
        strat.step(&broker).await.unwrap();

        let log = broker.cancellation_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].1, "GS");
    }

    #[tokio::test(start_paused = true)]
    async fn fills_are_sold_at_ask_and_cycle_restarts() {
        let broker = sim(SimBroker::new(calm())).await;
        let mut strat = TickerStrategy::new("KO", StrategyParams::default(), EventSink::disabled());
        strat.step(&broker).await.unwrap();

        // ask 99.94 menyilang semua ladder
        broker.set_mid("KO", 99_90).await;
        strat.step(&broker).await.unwrap();

        assert_eq!(strat.executed_lots(), 5);
        assert_eq!(strat.sold_lots(), 5);
        assert_eq!(strat.stage(), Stage::Buy);

        let waiting = broker.waiting_list().await.unwrap();
        let sell = waiting.iter().find(|o| o.order_type == OrderType::LimitSell).unwrap();
        assert_eq!(sell.size, 5);
        assert_eq!(sell.price, Some(99_94));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ten_sell_cycles() {
        let broker = sim(SimBroker::new(calm())).await;
        let mut strat = TickerStrategy::new("PG", StrategyParams::default(), EventSink::disabled());
        strat.step(&broker).await.unwrap();

        for _ in 0..9 {
            strat.step(&broker).await.unwrap();
        }
        assert_eq!(strat.stage(), Stage::Sell);
        assert_eq!(strat.sell_cycle(), 9);

        strat.step(&broker).await.unwrap();
        assert_eq!(strat.stage(), Stage::Buy);
        assert_eq!(strat.sold_lots(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sold_never_exceeds_executed() {
        for accounting in [FillAccounting::Cumulative, FillAccounting::LastExecution] {
            for variant in [Variant::Ladder, Variant::Single] {
                let broker = sim(SimBroker::new(SimConfig { seed: 11, ..SimConfig::default() })).await;
                let params = StrategyParams { accounting, variant, ..StrategyParams::default() };
                let mut strat = TickerStrategy::new("WMT", params, EventSink::disabled());

                for _ in 0..120 {
                    strat.step(&broker).await.unwrap();
                    let executed = true_executed(&broker, &strat).await;
                    assert!(
                        strat.sold_lots() <= executed,
                        "{accounting:?}/{variant:?}: sold {} > executed {}",
                        strat.sold_lots(),
                        executed
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn last_execution_accounting_undersells_partial_fills() {
        let params = |accounting| StrategyParams {
            variant: Variant::Single,
            accounting,
            ..StrategyParams::default()
        };

        // Single @ ask: 3 lot langsung fill saat submit, 2 lot sisanya di step berikutnya
        let broker = sim(SimBroker::new(calm())).await;
        let mut strat = TickerStrategy::new("V", params(FillAccounting::LastExecution), EventSink::disabled());
        strat.step(&broker).await.unwrap();
        strat.step(&broker).await.unwrap();
        assert_eq!(strat.sold_lots(), 3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        strat.step(&broker).await.unwrap();
        assert_eq!(true_executed(&broker, &strat).await, 5);
        assert_eq!(strat.executed_lots(), 2);
        assert_eq!(strat.sold_lots(), 3);
        assert_eq!(strat.stage(), Stage::Sell);

        let broker = sim(SimBroker::new(calm())).await;
        let mut strat = TickerStrategy::new("V", params(FillAccounting::Cumulative), EventSink::disabled());
        strat.step(&broker).await.unwrap();
        strat.step(&broker).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        strat.step(&broker).await.unwrap();
        assert_eq!(strat.sold_lots(), 5);
        assert_eq!(strat.stage(), Stage::Buy);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticker_stops_at_end_time_and_cleans_up() {
        let cfg = calm();
        let end = cfg.open_time + chrono::Duration::seconds(30);
        let sim = sim(SimBroker::new(cfg)).await;
        let broker: Arc<dyn Broker> = Arc::new(sim);

        let report = run_ticker(broker.clone(), "MRK".into(), end, StrategyParams::default(), EventSink::disabled())
            .await
            .unwrap();

        assert!(report.buy_cycles >= 1);
        assert!(broker.last_trade_time().await.unwrap() >= end);
        assert!(broker.waiting_list().await.unwrap().iter().all(|o| o.symbol != "MRK"));
        let open: Vec<OrderStatus> = broker
            .submitted_orders()
            .await
            .unwrap()
            .into_iter()
            .filter(|o| o.status.is_open())
            .map(|o| o.status)
            .collect();
        assert!(open.is_empty());
        assert_eq!(broker.portfolio_item("MRK").await.unwrap().shares, 0);
    }
}
