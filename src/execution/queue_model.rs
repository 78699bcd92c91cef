use crate::types::{Side, Trade};

const PRICE_MATCH_TOL: f64 = 1e-9;

/// Approximate maker fill model driven by visible book quantity and the
/// trade tape.
///
/// On placement the order is assumed behind the visible quantity at its
/// level (`queue_ahead_qty`). The queue shrinks when trades execute at the
/// level against our side, or when the visible quantity drops below it
/// (cancels or executions ahead of us). Visible-quantity increases never
/// grow the queue: new liquidity joins behind us.
#[derive(Clone, Debug)]
pub struct MakerQueueOrder {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub filled_qty: f64,
    pub queue_ahead_qty: f64,
    /// Fraction of each trade's volume credited to this level, in (0, 1].
    pub trade_participation: f64,
    /// Lower value means older maker, served first at the level.
    pub priority_seq: u64,
}

impl MakerQueueOrder {
    #[inline]
    pub fn remaining_qty(&self) -> f64 {
        (self.quantity - self.filled_qty).max(0.0)
    }

    #[inline]
    pub fn is_filled(&self) -> bool {
        self.remaining_qty() <= 0.0
    }

    /// Update visible queue ahead from an orderbook level update.
    /// Shrink-only: increases are assumed to queue behind us.
    pub fn on_book_qty_update(&mut self, new_visible_qty: f64) {
        let v = new_visible_qty.max(0.0);
        if v < self.queue_ahead_qty {
            self.queue_ahead_qty = v;
        }
    }

    fn matches_trade(&self, trade: &Trade) -> bool {
        if trade.symbol != self.symbol || self.is_filled() {
            return false;
        }
        if (trade.price - self.price).abs() > PRICE_MATCH_TOL {
            return false;
        }
        // is_buyer_maker=true  => sell aggressor, fills resting bids.
        // is_buyer_maker=false => buy aggressor, fills resting asks.
        match self.side {
            Side::Buy => trade.is_buyer_maker,
            Side::Sell => !trade.is_buyer_maker,
        }
    }

    /// Consume the trade tape with an optional per-trade volume budget
    /// shared across makers at the same level.
    ///
    /// Returns `(filled_qty, consumed_trade_qty)`: the quantity credited to
    /// this order and the trade volume it used up (queue + fill), so the
    /// caller can decrement the shared budget.
    pub fn on_trade_budgeted(&mut self, trade: &Trade, max_trade_qty: Option<f64>) -> (f64, f64) {
        if !self.matches_trade(trade) {
            return (0.0, 0.0);
        }

        let mut v = trade.quantity * self.trade_participation;
        if let Some(budget) = max_trade_qty {
            v = v.min(budget.max(0.0));
        }
        if v <= 0.0 {
            return (0.0, 0.0);
        }

        let queue_before = self.queue_ahead_qty;
        if queue_before >= v {
            self.queue_ahead_qty -= v;
            return (0.0, v);
        }

        // Queue exhausted; the excess volume fills us.
        self.queue_ahead_qty = 0.0;
        let fill = self.remaining_qty().min(v - queue_before);
        self.filled_qty += fill;
        (fill, queue_before + fill)
    }

    /// Unbudgeted variant; returns the filled quantity only.
    pub fn on_trade(&mut self, trade: &Trade) -> f64 {
        self.on_trade_budgeted(trade, None).0
    }
}
