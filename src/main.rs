// ===============================
// src/main.rs
// ===============================
/*
 # contoh: satu ticker, sesi 30 menit, simulator lokal
 BROKER_MODE=sim RUN_MODE=test SESSION_HOURS=0.5 cargo run --release

 # metrics
 curl -s localhost:9898/metrics | egrep '^(orders_submitted_total|stage_transitions_total)'
*/
/*
=============================================================================
Project : lot_ladder_bot — per-ticker limit-ladder trading loop in Rust
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Connects to a market simulator (in-process or remote), runs one
          buy/sell ladder loop per ticker until the session closes, then
          cancels leftovers, flattens positions and prints P&L.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod recorder;
mod broker;
mod ledger;
mod sim;              // in-process simulator
mod wire;             // signer + JSON models for the remote simulator
mod remote;           // REST + best-price stream client
mod cleanup;
mod strategy;
mod report;
mod session;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::broker::Broker;
use crate::domain::Event;
use crate::recorder::EventSink;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Config ----
    let args = config::load();
    let session_cfg = args.session();

    info!(
        broker = ?args.broker,
        mode = ?args.mode,
        tickers = ?session_cfg.tickers,
        order_size = session_cfg.strategy.order_size,
        variant = ?session_cfg.strategy.variant,
        accounting = ?session_cfg.strategy.accounting,
        session_hours = args.session_hours,
        "startup config"
    );

    // ---- Metrics ----
    metrics::init();
    for t in &session_cfg.tickers {
        metrics::CONFIG_TICKER.with_label_values(&[t]).set(1);
    }
    if args.metrics_port != 0 {
        metrics::serve_metrics(args.metrics_port);
    }

    // ---- Recorder (optional) ----
    let (sink, recorder) = match args.record_file.clone() {
        Some(path) => {
            let (tx, rx) = mpsc::channel::<Event>(8192);
            (EventSink::new(tx), Some(tokio::spawn(recorder::run(rx, path))))
        }
        None => (EventSink::disabled(), None),
    };

    // ---- Broker ----
    let broker: Arc<dyn Broker> = match args.broker {
        config::BrokerMode::Sim => Arc::new(sim::SimBroker::new(args.sim())),
        config::BrokerMode::Remote => Arc::new(remote::RemoteBroker::new(args.remote())),
    };

    let settle = session_cfg.strategy.settle;
    let result = session::with_connection(broker, &args.credentials(), |b| {
        let sink = sink.clone();
        async move {
            session::prepare(b.as_ref(), settle, &sink).await?;
            session::run_session(b, &session_cfg, sink).await
        }
    })
    .await;

    // tutup channel recorder agar file di-flush
    drop(sink);
    if let Some(h) = recorder {
        let _ = h.await;
    }

    match result {
        Ok(report) => info!(
            spawned = report.spawned,
            failed = ?report.failed,
            pnl_delta = %domain::fmt_px(report.pnl_delta),
            final_bp = %domain::fmt_px(report.final_bp),
            "session finished"
        ),
        Err(e) => {
            error!(?e, "session failed");
            std::process::exit(1);
        }
    }
}
