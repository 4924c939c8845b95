// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static ORDERS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orders_submitted_total", "orders submitted to the broker"),
        &["symbol", "type"],
    )
    .unwrap()
});

pub static CANCELS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cancellations_total", "cancellation requests submitted"),
        &["symbol"],
    )
    .unwrap()
});

pub static STAGE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("stage_transitions_total", "strategy stage entries (labels: symbol, stage)"),
        &["symbol", "stage"],
    )
    .unwrap()
});

pub static BROKER_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("broker_errors_total", "failed broker calls by operation"),
        &["op"],
    )
    .unwrap()
});

pub static PNL_DELTA: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pnl_realized_delta", "realized PnL since session start (cents)"),
        &["symbol"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_TICKER: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_ticker", "configured tickers (label: symbol)"),
        &["symbol"],
    )
    .unwrap()
});

pub fn init() {
    for m in [
        REGISTRY.register(Box::new(ORDERS_SUBMITTED.clone())),
        REGISTRY.register(Box::new(CANCELS.clone())),
        REGISTRY.register(Box::new(STAGE_TRANSITIONS.clone())),
        REGISTRY.register(Box::new(BROKER_ERRORS.clone())),
        REGISTRY.register(Box::new(PNL_DELTA.clone())),
        REGISTRY.register(Box::new(CONFIG_TICKER.clone())),
    ] {
        if let Err(e) = m {
            tracing::warn!(?e, "metric registration failed");
        }
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// tiny HTTP 1.1 responder: apa pun request-nya, balas body metrics
fn handle_client(mut stream: TcpStream) {
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(?e, %addr, "metrics bind failed");
                return;
            }
        };
        tracing::info!(%addr, "metrics listening");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(?e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_registered_families() {
        init();
        ORDERS_SUBMITTED.with_label_values(&["BA", "LIMIT_BUY"]).inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("orders_submitted_total"));
    }
}
