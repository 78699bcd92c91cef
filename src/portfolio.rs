use std::collections::HashMap;

use crate::types::Side;

/// Signed position in one symbol. `avg_price` is 0 whenever `qty` is 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct Position {
    pub qty: f64,
    pub avg_price: f64,
}

/// Multi-symbol position ledger with realized PnL and fee accounting.
#[derive(Clone, Debug, Default)]
pub struct Portfolio {
    pub positions: HashMap<String, Position>,
    pub realized_pnl_usdt: f64,
    pub fees_paid_usdt: f64,
}

const EPS_QTY: f64 = 1e-12;

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    #[inline]
    pub fn position_qty(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.qty)
    }

    /// Mark-to-market PnL of the open position in one symbol.
    pub fn unrealized_pnl(&self, symbol: &str, mark_price: f64) -> f64 {
        match self.positions.get(symbol) {
            Some(p) if p.qty != 0.0 => p.qty * (mark_price - p.avg_price),
            _ => 0.0,
        }
    }

    /// Apply one fill.
    ///
    /// Same-sign fills move the average price; reducing fills realize
    /// `sign(qty)·(price − avg)` per unit without touching the average;
    /// fills larger than the open position close it fully and open the
    /// remainder at the fill price. Fees always reduce realized PnL.
    pub fn apply_fill(&mut self, symbol: &str, side: Side, qty: f64, price: f64, fee_usdt: f64) {
        let pos = self.positions.entry(symbol.to_string()).or_default();
        let d = if side.is_buy() { qty } else { -qty };

        if pos.qty == 0.0 || (pos.qty > 0.0) == (d > 0.0) {
            // Opening or increasing.
            let total = pos.qty.abs() + d.abs();
            if total > 0.0 {
                pos.avg_price = (pos.qty.abs() * pos.avg_price + d.abs() * price) / total;
            }
            pos.qty += d;
        } else if d.abs() <= pos.qty.abs() + EPS_QTY {
            // Reducing (possibly to flat).
            self.realized_pnl_usdt += pos.qty.signum() * (price - pos.avg_price) * d.abs();
            pos.qty += d;
            if pos.qty.abs() <= EPS_QTY {
                pos.qty = 0.0;
                pos.avg_price = 0.0;
            }
        } else {
            // Flipping: realize the full close, open the remainder.
            self.realized_pnl_usdt += pos.qty.signum() * (price - pos.avg_price) * pos.qty.abs();
            let remainder = d.abs() - pos.qty.abs();
            pos.qty = d.signum() * remainder;
            pos.avg_price = price;
        }

        self.fees_paid_usdt += fee_usdt;
        self.realized_pnl_usdt -= fee_usdt;
    }

    /// Apply one funding payment: long pays a positive rate, short receives.
    /// Returns the funding PnL applied (0.0 when flat).
    pub fn apply_funding(&mut self, symbol: &str, mark_price: f64, funding_rate: f64) -> f64 {
        let qty = self.position_qty(symbol);
        if qty == 0.0 {
            return 0.0;
        }
        let pnl = -qty * mark_price * funding_rate;
        self.realized_pnl_usdt += pnl;
        pnl
    }
}
