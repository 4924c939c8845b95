// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : lot_ladder_bot — per-ticker limit-ladder trading loop in Rust
Module  : config.rs
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
use std::time::Duration;

use chrono::NaiveTime;
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;

use crate::broker::Credentials;
use crate::remote::RemoteCfg;
use crate::session::SessionCfg;
use crate::sim::SimConfig;
use crate::strategy::{FillAccounting, StrategyParams, Variant};

/// Sumber broker
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BrokerMode {
    Sim,
    Remote,
}

/// Daftar ticker default
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Prod,
    Test,
}

impl RunMode {
    pub fn default_tickers(&self) -> Vec<String> {
        let list: &[&str] = match self {
            RunMode::Prod => &["BA", "CAT", "KO", "MRK", "PG", "WMT", "MMM", "GS", "INTC", "UNH", "VZ", "V"],
            RunMode::Test => &["BA"],
        };
        list.iter().map(|s| s.to_string()).collect()
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "lot_ladder_bot", version, about = "Per-ticker limit ladder against a market simulator")]
pub struct Args {
    // ===== Broker =====
    #[arg(long, env = "BROKER_MODE", value_enum, default_value = "sim")]
    pub broker: BrokerMode,
    #[arg(long, env = "BROKER_REST_URL", default_value = "http://127.0.0.1:8080")]
    pub rest_url: String,
    #[arg(long, env = "BROKER_WS_URL", default_value = "ws://127.0.0.1:8080/ws")]
    pub ws_url: String,
    #[arg(long, env = "BROKER_API_KEY", default_value = "")]
    pub api_key: String,
    #[arg(long, env = "BROKER_API_SECRET", default_value = "", hide_env_values = true)]
    pub api_secret: String,
    #[arg(long, env = "BROKER_RECV_WINDOW", default_value_t = 5000)]
    pub recv_window_ms: u64,
    #[arg(long, env = "BROKER_MAX_INFLIGHT", default_value_t = 8)]
    pub max_inflight: usize,
    #[arg(long, env = "BROKER_USERNAME", default_value = "exp")]
    pub username: String,
    #[arg(long, env = "BROKER_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    // ===== Session =====
    #[arg(long, env = "RUN_MODE", value_enum, default_value = "prod")]
    pub mode: RunMode,
    /// overrides the run mode's list, e.g. TICKERS=BA,CAT
    #[arg(long, env = "TICKERS", value_delimiter = ',')]
    pub tickers: Vec<String>,
    #[arg(long, env = "SESSION_HOURS", default_value_t = 6.0)]
    pub session_hours: f64,
    /// HH:MM:SS on the trading date
    #[arg(long, env = "SESSION_OPEN")]
    pub open: Option<NaiveTime>,
    #[arg(long, env = "SESSION_CLOSE")]
    pub close: Option<NaiveTime>,
    #[arg(long, env = "SESSION_POLL_SECS", default_value_t = 60)]
    pub session_poll_secs: u64,
    #[arg(long, env = "SPAWN_STAGGER_MS", default_value_t = 1000)]
    pub stagger_ms: u64,
    #[arg(long, env = "REPORT_ORDERS", default_value_t = false)]
    pub report_orders: bool,

    // ===== Strategy =====
    #[arg(long, env = "ORDER_SIZE", default_value_t = 5)]
    pub order_size: i64,
    #[arg(long, env = "MAX_SELL_CYCLES", default_value_t = 10)]
    pub max_sell_cycles: u32,
    #[arg(long, env = "CHECK_FREQ_MS", default_value_t = 1000)]
    pub check_freq_ms: u64,
    #[arg(long, env = "SETTLE_MS", default_value_t = 1000)]
    pub settle_ms: u64,
    #[arg(long, env = "VARIANT", value_enum, default_value = "ladder")]
    pub variant: Variant,
    #[arg(long, env = "FILL_ACCOUNTING", value_enum, default_value = "cumulative")]
    pub fill_accounting: FillAccounting,
    #[arg(long, env = "TRACE_BOOK", default_value_t = false)]
    pub trace_book: bool,

    // ===== Files / metrics =====
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,
    /// 0 disables the endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,

    // ===== Simulator =====
    #[arg(long, env = "SIM_SEED", default_value_t = 7)]
    pub sim_seed: u64,
    /// cents
    #[arg(long, env = "SIM_INITIAL_BP", default_value_t = 1_000_000_00)]
    pub sim_initial_bp: i64,
    #[arg(long, env = "SIM_SPREAD_TICKS", default_value_t = 4)]
    pub sim_spread_ticks: i64,
    #[arg(long, env = "SIM_VOLATILITY_TICKS", default_value_t = 3)]
    pub sim_volatility_ticks: i64,
    #[arg(long, env = "SIM_MAX_FILL_LOTS", default_value_t = 3)]
    pub sim_max_fill_lots: i64,
}

impl Args {
    pub fn tickers(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .tickers
            .iter()
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        out.dedup();
        if out.is_empty() { self.mode.default_tickers() } else { out }
    }

    pub fn strategy(&self) -> StrategyParams {
        StrategyParams {
            order_size: self.order_size.max(1),
            max_sell_cycles: self.max_sell_cycles.max(1),
            check_freq: Duration::from_millis(self.check_freq_ms),
            settle: Duration::from_millis(self.settle_ms),
            variant: self.variant,
            accounting: self.fill_accounting,
            trace_book: self.trace_book,
        }
    }

    pub fn session(&self) -> SessionCfg {
        SessionCfg {
            tickers: self.tickers(),
            open: self.open,
            close: self.close,
            duration: chrono::Duration::seconds((self.session_hours * 3600.0).round() as i64),
            poll: Duration::from_secs(self.session_poll_secs.max(1)),
            stagger: Duration::from_millis(self.stagger_ms),
            settle: Duration::from_millis(self.settle_ms),
            report_orders: self.report_orders,
            strategy: self.strategy(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials { username: self.username.clone(), password: self.password.clone() }
    }

    pub fn remote(&self) -> RemoteCfg {
        RemoteCfg {
            rest_base: self.rest_url.trim_end_matches('/').to_string(),
            ws_base: self.ws_url.clone(),
            api_key: self.api_key.clone(),
            api_secret: self.api_secret.clone(),
            recv_window_ms: self.recv_window_ms,
            max_inflight: self.max_inflight,
        }
    }

    pub fn sim(&self) -> SimConfig {
        SimConfig {
            seed: self.sim_seed,
            initial_bp: self.sim_initial_bp,
            spread_ticks: self.sim_spread_ticks.max(1),
            volatility_ticks: self.sim_volatility_ticks.max(0),
            max_fill_lots: self.sim_max_fill_lots.max(1),
            ..SimConfig::default()
        }
    }
}

pub fn load() -> Args {
    // Pastikan .env dibaca sebelum clap membaca ENV
    let _ = dotenv();
    Args::parse()
}
