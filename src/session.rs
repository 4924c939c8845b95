// ===============================
// src/session.rs (orchestrator)
// ===============================
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::broker::{Broker, BrokerError, Credentials};
use crate::cleanup;
use crate::domain::{fmt_px, Event};
use crate::recorder::EventSink;
use crate::report;
use crate::strategy::{run_ticker, StrategyParams, TickerReport};

#[derive(Debug, Clone)]
pub struct SessionCfg {
    pub tickers: Vec<String>,
    /// wall-clock open/close on the trading date; None = now / now + duration
    pub open: Option<NaiveTime>,
    pub close: Option<NaiveTime>,
    pub duration: chrono::Duration,
    /// orchestrator polling period while waiting for open/close
    pub poll: Duration,
    /// delay between spawning ticker tasks
    pub stagger: Duration,
    pub settle: Duration,
    pub report_orders: bool,
    pub strategy: StrategyParams,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            tickers: vec!["BA".to_string()],
            open: None,
            close: None,
            duration: chrono::Duration::hours(6),
            poll: Duration::from_secs(60),
            stagger: Duration::from_secs(1),
            settle: Duration::from_secs(1),
            report_orders: false,
            strategy: StrategyParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub spawned: usize,
    pub tickers: Vec<TickerReport>,
    pub failed: Vec<String>,
    pub pnl_delta: i64,
    pub final_bp: i64,
}

/// Connect, run `f`, and disconnect whatever `f` returned.
pub async fn with_connection<F, Fut, T>(
    broker: Arc<dyn Broker>,
    creds: &Credentials,
    f: F,
) -> Result<T, BrokerError>
where
    F: FnOnce(Arc<dyn Broker>) -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    broker.connect(creds).await?;
    let out = f(broker.clone()).await;
    if let Err(e) = broker.disconnect().await {
        warn!(?e, "disconnect failed");
    }
    out
}

/// Subscribe to market data and clear every order left from earlier runs.
pub async fn prepare(broker: &dyn Broker, settle: Duration, sink: &EventSink) -> Result<(), BrokerError> {
    sleep(settle).await;
    broker.subscribe_all_order_books().await?;
    sleep(settle).await;
    let n = cleanup::cancel_all_orders(broker, "", settle, sink).await?;
    info!(cancelled = n, "startup sweep done");
    Ok(())
}

pub fn session_window(now: DateTime<Utc>, cfg: &SessionCfg) -> (DateTime<Utc>, DateTime<Utc>) {
    let on_date = |t: NaiveTime| now.date_naive().and_time(t).and_utc();
    let start = cfg.open.map(on_date).unwrap_or(now);
    let end = cfg.close.map(on_date).unwrap_or(start + cfg.duration);
    (start, end)
}

pub async fn run_session(
    broker: Arc<dyn Broker>,
    cfg: &SessionCfg,
    sink: EventSink,
) -> Result<SessionReport, BrokerError> {
    let (start, end) = session_window(broker.last_trade_time().await?, cfg);
    info!(%start, %end, tickers = ?cfg.tickers, "session window");

    while broker.last_trade_time().await? < start {
        info!("still waiting for market open");
        sleep(cfg.poll).await;
    }

    let initial_pl = broker.portfolio_summary().await?.total_realized_pl;
    report::print_current_portfolio(broker.as_ref()).await?;
    report::print_portfolio_items(broker.as_ref()).await?;

    info!("START");
    sink.emit(Event::Note("START".into()));
    let mut handles = Vec::with_capacity(cfg.tickers.len());
    for ticker in &cfg.tickers {
        let task = run_ticker(broker.clone(), ticker.clone(), end, cfg.strategy.clone(), sink.clone());
        handles.push((ticker.clone(), tokio::spawn(task)));
        sleep(cfg.stagger).await;
    }
    let spawned = handles.len();

    while broker.last_trade_time().await? < end {
        sleep(cfg.poll).await;
    }

    // join tanpa timeout: loop yang tidak berhenti akan menahan sesi
    let mut reports = Vec::new();
    let mut failed = Vec::new();
    for (ticker, handle) in handles {
        match handle.await {
            Ok(Ok(r)) => {
                info!(symbol = %r.symbol, pnl = %fmt_px(r.pnl_delta), buy_cycles = r.buy_cycles,
                    sold_lots = r.sold_lots, flatten = ?r.flatten, "ticker loop finished");
                reports.push(r);
            }
            Ok(Err(e)) => {
                error!(symbol = %ticker, ?e, "ticker loop failed");
                failed.push(ticker);
            }
            Err(e) => {
                error!(symbol = %ticker, ?e, "ticker task panicked or was aborted");
                failed.push(ticker);
            }
        }
    }

    for ticker in &cfg.tickers {
        if let Err(e) = cleanup::cancel_orders(broker.as_ref(), ticker, cfg.settle, &sink).await {
            warn!(symbol = %ticker, ?e, "final cancel sweep failed");
        }
        if let Err(e) = cleanup::close_positions(broker.as_ref(), ticker, cfg.settle, &sink).await {
            warn!(symbol = %ticker, ?e, "final flatten failed");
        }
    }

    info!("END");
    sink.emit(Event::Note("END".into()));
    for ticker in &cfg.tickers {
        if let Err(e) = report::print_portfolio(broker.as_ref(), ticker).await {
            warn!(symbol = %ticker, ?e, "portfolio row unavailable");
        }
    }
    if cfg.report_orders {
        report::print_waiting_orders(broker.as_ref()).await?;
        report::print_submitted_orders(broker.as_ref()).await?;
        report::print_executions(broker.as_ref()).await?;
    }

    let summary = broker.portfolio_summary().await?;
    let pnl_delta = summary.total_realized_pl - initial_pl;
    println!("final bp: {}", fmt_px(summary.total_bp));
    println!("final profits/losses: {}", fmt_px(pnl_delta));

    Ok(SessionReport { spawned, tickers: reports, failed, pnl_delta, final_bp: summary.total_bp })
}
