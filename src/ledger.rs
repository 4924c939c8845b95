// ===============================
// src/ledger.rs (avg-cost position & realized PnL per symbol)
// ===============================

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};

use crate::domain::{PortfolioItem, LOT_SIZE};

#[derive(Debug, Clone, Default)]
pub struct Position {
    /// net shares (negatif = short)
    pub qty: i64,
    pub avg_cost_px: i64,
    pub realized_pnl: i64,
}

#[derive(Debug, Default)]
pub struct Ledger {
    positions: HashMap<String, Position>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    /// Apply an execution of `lots` at `px`; `sign` is +1 for buys, -1 for sells.
    pub fn on_fill(&mut self, symbol: &str, sign: i64, lots: i64, px: i64) {
        let entry = self.positions.entry(symbol.to_string()).or_default();
        let signed_qty = sign * lots * LOT_SIZE;

        let prev_qty = entry.qty;
        let new_qty = prev_qty + signed_qty;
        if prev_qty == 0 || prev_qty.signum() == signed_qty.signum() {
            // arah sama -> update avg cost
            let prev_abs = prev_qty.abs();
            let add_abs = signed_qty.abs();
            entry.avg_cost_px = (entry.avg_cost_px * prev_abs + px * add_abs) / (prev_abs + add_abs);
            entry.qty = new_qty;
            return;
        }

        // arah berlawanan -> realize PnL pada qty yang ditutup
        let qty_closed = signed_qty.abs().min(prev_qty.abs());
        let per_share = if prev_qty > 0 { px - entry.avg_cost_px } else { entry.avg_cost_px - px };
        entry.realized_pnl += per_share * qty_closed;
        entry.qty = new_qty;

        if entry.qty == 0 {
            entry.avg_cost_px = 0;
        } else if entry.qty.signum() != prev_qty.signum() {
            // posisi berbalik arah: sisa dibuka di harga fill
            entry.avg_cost_px = px;
        }
    }

    /// Overwrite a position (scenario setup).
    pub fn set(&mut self, symbol: &str, qty: i64, avg_cost_px: i64) {
        let entry = self.positions.entry(symbol.to_string()).or_default();
        entry.qty = qty;
        entry.avg_cost_px = if qty == 0 { 0 } else { avg_cost_px };
    }

    pub fn position(&self, symbol: &str) -> Position {
        self.positions.get(symbol).cloned().unwrap_or_default()
    }

    pub fn item(&self, symbol: &str, ts: DateTime<Utc>) -> PortfolioItem {
        let pos = self.position(symbol);
        PortfolioItem {
            symbol: symbol.to_string(),
            long_shares: pos.qty.max(0),
            short_shares: (-pos.qty).max(0),
            shares: pos.qty,
            price: pos.avg_cost_px,
            realized_pl: pos.realized_pnl,
            timestamp: ts,
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.positions.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn total_shares(&self) -> i64 {
        self.positions.values().map(|p| p.qty.abs()).sum()
    }

    pub fn total_realized(&self) -> i64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// Capital tied up in open positions (ticks).
    pub fn exposure(&self) -> i64 {
        self.positions.values().map(|p| p.qty.abs() * p.avg_cost_px).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_realizes_pnl() {
        let mut l = Ledger::new();
        l.on_fill("BA", 1, 2, 100_00);
        l.on_fill("BA", 1, 2, 102_00);
        assert_eq!(l.position("BA").qty, 400);
        assert_eq!(l.position("BA").avg_cost_px, 101_00);

        l.on_fill("BA", -1, 4, 103_00);
        let p = l.position("BA");
        assert_eq!(p.qty, 0);
        assert_eq!(p.avg_cost_px, 0);
        // (103.00 - 101.00) * 400 shares = 800.00
        assert_eq!(p.realized_pnl, 800_00);
    }

    #[test]
    fn short_cover_and_flip() {
        let mut l = Ledger::new();
        l.on_fill("KO", -1, 1, 60_00);
        let item = l.item("KO", Utc::now());
        assert_eq!(item.short_shares, 100);
        assert_eq!(item.long_shares, 0);

        // cover 100 at 59.00 (+1.00/share), then 100 more opens a long at 59.00
        l.on_fill("KO", 1, 2, 59_00);
        let p = l.position("KO");
        assert_eq!(p.realized_pnl, 100_00);
        assert_eq!(p.qty, 100);
        assert_eq!(p.avg_cost_px, 59_00);
    }
}
