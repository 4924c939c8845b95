// ===============================
// src/sim.rs (in-process market simulator)
// ===============================
//
// Broker lokal untuk mode `sim` dan untuk test:
// - Jam: last_trade_time = open_time + elapsed (tokio time, jadi deterministik
//   saat runtime di-pause).
// - Quote: random walk ber-seed per symbol setiap `step`, floor 50.00.
// - Matching: market order fill penuh saat submit; limit order fill di harga
//   limit saat menyilang best bid/ask, maksimal `max_fill_lots` per step.
//
use std::collections::BTreeMap;
use std::time::Duration;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info};

use crate::broker::{Broker, BrokerError, Credentials};
use crate::domain::{
    BestPrice, Order, OrderBookEntry, OrderBookType, OrderStatus, PortfolioItem, PortfolioSummary,
};
use crate::ledger::Ledger;

const PX_FLOOR: i64 = 50_00;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub open_time: DateTime<Utc>,
    pub step: Duration,
    pub start_px: i64,
    pub spread_ticks: i64,
    pub volatility_ticks: i64,
    pub max_fill_lots: i64,
    pub initial_bp: i64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            open_time: Utc::now(),
            step: Duration::from_secs(1),
            start_px: 100_00,
            spread_ticks: 4,
            volatility_ticks: 3,
            max_fill_lots: 3,
            initial_bp: 1_000_000_00,
            seed: 7,
        }
    }
}

struct SimState {
    connected: bool,
    subscribed: bool,
    rng: StdRng,
    steps_done: u64,
    // BTreeMap: urutan walk per step harus stabil untuk seed yang sama
    mids: BTreeMap<String, i64>,
    orders: Vec<Order>,
    by_id: HashMap<String, usize>,
    // indeks limit order yang masih open; hanya ini yang di-match tiap step
    resting: Vec<usize>,
    executions: HashMap<String, Vec<Order>>,
    ledger: Ledger,
    cancellations: Vec<(String, String)>,
}

pub struct SimBroker {
    cfg: SimConfig,
    origin: Instant,
    state: Mutex<SimState>,
}

impl SimBroker {
    pub fn new(cfg: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            origin: Instant::now(),
            state: Mutex::new(SimState {
                connected: false,
                subscribed: false,
                rng,
                steps_done: 0,
                mids: BTreeMap::new(),
                orders: Vec::new(),
                by_id: HashMap::new(),
                resting: Vec::new(),
                executions: HashMap::new(),
                ledger: Ledger::new(),
                cancellations: Vec::new(),
            }),
        }
    }

    /// Seed an existing position before the session starts.
    pub fn with_position(mut self, symbol: &str, shares: i64, avg_px: i64) -> Self {
        let st = self.state.get_mut();
        st.ledger.set(symbol, shares, avg_px);
        st.mids.entry(symbol.to_string()).or_insert(self.cfg.start_px);
        self
    }

    /// Move a quote by hand; resting orders are matched against it right away.
    pub async fn set_mid(&self, symbol: &str, mid: i64) {
        let mut st = self.state.lock().await;
        self.advance(&mut st);
        st.mids.insert(symbol.to_string(), mid.max(PX_FLOOR));
        let now = self.now();
        self.match_resting(&mut st, now);
    }

    /// (order id, symbol) of every cancellation request received, in order.
    pub async fn cancellation_log(&self) -> Vec<(String, String)> {
        self.state.lock().await.cancellations.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_default();
        self.cfg.open_time + elapsed
    }

    fn quote(&self, st: &mut SimState, symbol: &str) -> BestPrice {
        let mid = *st.mids.entry(symbol.to_string()).or_insert(self.cfg.start_px);
        BestPrice { bid: mid, ask: mid + self.cfg.spread_ticks }
    }

    /// Catch the market up with virtual time: one walk + match per elapsed step.
    fn advance(&self, st: &mut SimState) {
        let step_ns = self.cfg.step.as_nanos().max(1);
        let target = (self.origin.elapsed().as_nanos() / step_ns) as u64;
        while st.steps_done < target {
            let vol = self.cfg.volatility_ticks;
            let SimState { mids, rng, .. } = &mut *st;
            for mid in mids.values_mut() {
                let delta = rng.gen_range(-vol..=vol);
                *mid = (*mid + delta).max(PX_FLOOR);
            }
            st.steps_done += 1;
            let ts = self.cfg.open_time
                + chrono::Duration::from_std(self.cfg.step * st.steps_done as u32).unwrap_or_default();
            self.match_resting(st, ts);
        }
    }

    fn match_resting(&self, st: &mut SimState, ts: DateTime<Utc>) {
        let resting = std::mem::take(&mut st.resting);
        for &idx in &resting {
            self.try_fill_limit(st, idx, ts);
        }
        st.resting = resting.into_iter().filter(|&idx| st.orders[idx].status.is_open()).collect();
    }

    fn try_fill_limit(&self, st: &mut SimState, idx: usize, ts: DateTime<Utc>) {
        let o = &st.orders[idx];
        if !o.status.is_open() || !o.order_type.is_limit() || o.remaining() <= 0 {
            return;
        }
        let Some(limit) = o.price else { return };
        let (symbol, order_type, remaining) = (o.symbol.clone(), o.order_type, o.remaining());
        let best = self.quote(st, &symbol);
        let crosses = if order_type.is_buy() { best.ask <= limit } else { best.bid >= limit };
        if crosses {
            let lots = remaining.min(self.cfg.max_fill_lots.max(1));
            self.fill(st, idx, lots, limit, ts);
        }
    }

    fn fill(&self, st: &mut SimState, idx: usize, lots: i64, px: i64, ts: DateTime<Utc>) {
        let order = &mut st.orders[idx];
        order.executed_size += lots;
        order.executed_price = px;
        order.status = if order.remaining() == 0 { OrderStatus::Filled } else { OrderStatus::PartiallyFilled };
        order.timestamp = ts;

        let mut exec = order.clone();
        exec.executed_size = lots;
        exec.executed_price = px;
        let (id, symbol, sign) = (order.id.clone(), order.symbol.clone(), order.order_type.sign());

        debug!(%symbol, order_id = %id, lots, px, "sim fill");
        st.ledger.on_fill(&symbol, sign, lots, px);
        st.executions.entry(id).or_default().push(exec);
    }

    fn ensure_connected(st: &SimState) -> Result<(), BrokerError> {
        if st.connected { Ok(()) } else { Err(BrokerError::NotConnected) }
    }

    /// Lock, check the session and catch the market up in one go.
    async fn ready(&self) -> Result<tokio::sync::MutexGuard<'_, SimState>, BrokerError> {
        let mut st = self.state.lock().await;
        Self::ensure_connected(&st)?;
        self.advance(&mut st);
        Ok(st)
    }
}

#[async_trait]
impl Broker for SimBroker {
    async fn connect(&self, creds: &Credentials) -> Result<(), BrokerError> {
        let mut st = self.state.lock().await;
        st.connected = true;
        info!(username = %creds.username, "sim broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let mut st = self.state.lock().await;
        st.connected = false;
        st.subscribed = false;
        info!("sim broker disconnected");
        Ok(())
    }

    async fn subscribe_all_order_books(&self) -> Result<(), BrokerError> {
        let mut st = self.ready().await?;
        st.subscribed = true;
        Ok(())
    }

    async fn last_trade_time(&self) -> Result<DateTime<Utc>, BrokerError> {
        let _st = self.ready().await?;
        Ok(self.now())
    }

    async fn best_price(&self, symbol: &str) -> Result<BestPrice, BrokerError> {
        let mut st = self.ready().await?;
        Ok(self.quote(&mut st, symbol))
    }

    async fn order_book(
        &self,
        symbol: &str,
        side: OrderBookType,
        max_level: usize,
    ) -> Result<Vec<OrderBookEntry>, BrokerError> {
        let mut st = self.ready().await?;
        // book depth hanya tersedia setelah subscribe
        if !st.subscribed {
            return Ok(Vec::new());
        }
        let best = self.quote(&mut st, symbol);
        let levels = (0..max_level as i64)
            .map(|i| {
                let price = if side.is_bid() { best.bid - i } else { best.ask + i };
                OrderBookEntry { price, size: (i + 1) * 2 }
            })
            .filter(|e| e.price > 0)
            .collect();
        Ok(levels)
    }

    async fn portfolio_item(&self, symbol: &str) -> Result<PortfolioItem, BrokerError> {
        let st = self.ready().await?;
        Ok(st.ledger.item(symbol, self.now()))
    }

    async fn portfolio_items(&self) -> Result<Vec<PortfolioItem>, BrokerError> {
        let st = self.ready().await?;
        let now = self.now();
        Ok(st.ledger.symbols().iter().map(|s| st.ledger.item(s, now)).collect())
    }

    async fn portfolio_summary(&self) -> Result<PortfolioSummary, BrokerError> {
        let st = self.ready().await?;
        let realized = st.ledger.total_realized();
        Ok(PortfolioSummary {
            total_bp: self.cfg.initial_bp - st.ledger.exposure() + realized,
            total_shares: st.ledger.total_shares(),
            total_realized_pl: realized,
            timestamp: self.now(),
        })
    }

    async fn waiting_list(&self) -> Result<Vec<Order>, BrokerError> {
        let st = self.ready().await?;
        Ok(st.orders.iter().filter(|o| o.status.is_open()).cloned().collect())
    }

    async fn submitted_orders(&self) -> Result<Vec<Order>, BrokerError> {
        let st = self.ready().await?;
        Ok(st.orders.clone())
    }

    async fn executed_orders(&self, order_id: &str) -> Result<Vec<Order>, BrokerError> {
        let st = self.ready().await?;
        Ok(st.executions.get(order_id).cloned().unwrap_or_default())
    }

    async fn submit_order(&self, order: &Order) -> Result<(), BrokerError> {
        let mut guard = self.ready().await?;
        let st = &mut *guard;
        let now = self.now();

        let mut o = order.clone();
        o.executed_size = 0;
        o.executed_price = 0;
        o.timestamp = now;

        let reject = if st.by_id.contains_key(&o.id) {
            Some("duplicate order id")
        } else if o.size <= 0 {
            Some("size must be positive")
        } else if o.order_type.is_limit() && o.price.map_or(true, |p| p <= 0) {
            Some("limit order without a positive price")
        } else {
            None
        };
        if let Some(reason) = reject {
            o.status = OrderStatus::Rejected(reason.to_string());
            if !st.by_id.contains_key(&o.id) {
                st.by_id.insert(o.id.clone(), st.orders.len());
                st.orders.push(o);
            }
            return Err(BrokerError::Rejected(reason.to_string()));
        }

        o.status = OrderStatus::New;
        let idx = st.orders.len();
        st.by_id.insert(o.id.clone(), idx);
        let (symbol, order_type, size) = (o.symbol.clone(), o.order_type, o.size);
        st.orders.push(o);

        if order_type.is_limit() {
            self.try_fill_limit(st, idx, now);
            if st.orders[idx].status.is_open() {
                st.resting.push(idx);
            }
        } else {
            let best = self.quote(st, &symbol);
            let px = if order_type.is_buy() { best.ask } else { best.bid };
            self.fill(st, idx, size, px, now);
        }
        Ok(())
    }

    async fn submit_cancellation(&self, order: &Order) -> Result<(), BrokerError> {
        let mut guard = self.ready().await?;
        let st = &mut *guard;
        st.cancellations.push((order.id.clone(), order.symbol.clone()));
        if let Some(&idx) = st.by_id.get(&order.id) {
            let o = &mut st.orders[idx];
            if o.status.is_open() {
                o.status = OrderStatus::Canceled;
            }
            st.resting.retain(|&i| i != idx);
        }
        Ok(())
    }
}
