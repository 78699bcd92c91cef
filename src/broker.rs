//! Order simulator: taker fills from book depth, maker fills from a
//! queue-position model fed by the trade tape and book-level deltas.
//!
//! Submit and cancel latencies are modeled with due-time heaps. Cancels are
//! lazy: canceling an order (or a whole symbol) records a sequence cutoff,
//! and a pending submit whose sequence is at or below the cutoff is
//! discarded when its due time arrives, without scanning the heap.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::book::{BookSide, Books};
use crate::error::{SimError, SimResult};
use crate::execution::queue_model::MakerQueueOrder;
use crate::execution::taker::consume_taker_fill;
use crate::execution::{Order, OrderType, TimeInForce};
use crate::portfolio::Portfolio;
use crate::types::{price_key, DepthUpdate, Side, Trade};

// ─── Fills ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Maker,
    Taker,
}

#[derive(Clone, Debug, Serialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub fee_usdt: f64,
    pub event_time_ms: i64,
    pub liquidity: Liquidity,
}

// ─── Config ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub maker_fee_frac: f64,
    pub taker_fee_frac: f64,

    pub submit_latency_ms: i64,
    pub cancel_latency_ms: i64,

    // Conservative taker slippage overlay applied to the execution price:
    // slip = abs + px·bps/10000 + spread·spread_frac.
    pub taker_slippage_bps: f64,
    pub taker_slippage_spread_frac: f64,
    pub taker_slippage_abs: f64,

    // Conservative maker queue modeling.
    pub maker_queue_ahead_factor: f64,
    pub maker_queue_ahead_extra_qty: f64,
    pub maker_trade_participation: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            maker_fee_frac: 0.0004,
            taker_fee_frac: 0.0005,
            submit_latency_ms: 0,
            cancel_latency_ms: 0,
            taker_slippage_bps: 0.0,
            taker_slippage_spread_frac: 0.0,
            taker_slippage_abs: 0.0,
            maker_queue_ahead_factor: 1.0,
            maker_queue_ahead_extra_qty: 0.0,
            maker_trade_participation: 1.0,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> SimResult<()> {
        if self.taker_slippage_bps < 0.0 {
            return Err(SimError::Config("taker_slippage_bps must be >= 0".into()));
        }
        if self.taker_slippage_spread_frac < 0.0 {
            return Err(SimError::Config("taker_slippage_spread_frac must be >= 0".into()));
        }
        if self.taker_slippage_abs < 0.0 {
            return Err(SimError::Config("taker_slippage_abs must be >= 0".into()));
        }
        if self.maker_queue_ahead_factor < 0.0 {
            return Err(SimError::Config("maker_queue_ahead_factor must be >= 0".into()));
        }
        if self.maker_queue_ahead_extra_qty < 0.0 {
            return Err(SimError::Config("maker_queue_ahead_extra_qty must be >= 0".into()));
        }
        if !(self.maker_trade_participation > 0.0 && self.maker_trade_participation <= 1.0) {
            return Err(SimError::Config("maker_trade_participation must be in (0, 1]".into()));
        }
        if self.submit_latency_ms < 0 || self.cancel_latency_ms < 0 {
            return Err(SimError::Config("latencies must be >= 0".into()));
        }
        Ok(())
    }
}

// ─── Pending queues ─────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct PendingSubmit {
    due_ms: i64,
    seq: u64,
    order: Order,
}

impl PartialEq for PendingSubmit {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms && self.seq == other.seq
    }
}
impl Eq for PendingSubmit {}
impl PartialOrd for PendingSubmit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingSubmit {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due_ms, self.seq).cmp(&(other.due_ms, other.seq))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingCancel {
    due_ms: i64,
    seq: u64,
    order_id: String,
}

impl PartialOrd for PendingCancel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingCancel {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due_ms, self.seq).cmp(&(other.due_ms, other.seq))
    }
}

// ─── Broker ─────────────────────────────────────────────────────────────────

type LevelKey = (String, Side, i64);

#[derive(Clone, Debug)]
pub struct SimBroker {
    pub cfg: BrokerConfig,
    pub portfolio: Portfolio,
    pub fills: Vec<Fill>,

    maker_orders: HashMap<String, MakerQueueOrder>,
    maker_level_index: HashMap<LevelKey, Vec<String>>,
    maker_order_level_key: HashMap<String, LevelKey>,

    pending_submits: BinaryHeap<Reverse<PendingSubmit>>,
    pending_cancels: BinaryHeap<Reverse<PendingCancel>>,
    cancel_cutoff_by_order: HashMap<String, u64>,
    cancel_cutoff_by_symbol: HashMap<String, u64>,

    seq: u64,
    maker_seq: u64,
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::with_config_unchecked(BrokerConfig::default())
    }
}

impl SimBroker {
    pub fn new(cfg: BrokerConfig) -> SimResult<Self> {
        cfg.validate()?;
        Ok(Self::with_config_unchecked(cfg))
    }

    fn with_config_unchecked(cfg: BrokerConfig) -> Self {
        Self {
            cfg,
            portfolio: Portfolio::new(),
            fills: Vec::new(),
            maker_orders: HashMap::new(),
            maker_level_index: HashMap::new(),
            maker_order_level_key: HashMap::new(),
            pending_submits: BinaryHeap::new(),
            pending_cancels: BinaryHeap::new(),
            cancel_cutoff_by_order: HashMap::new(),
            cancel_cutoff_by_symbol: HashMap::new(),
            seq: 0,
            maker_seq: 0,
        }
    }

    /// Advance broker time: apply due cancels, then activate due submits.
    /// Cancels drain first so a cancel tying with a submit wins.
    pub fn on_time(&mut self, now_ms: i64, books: &mut Books) -> SimResult<()> {
        loop {
            match self.pending_cancels.peek() {
                Some(Reverse(pc)) if pc.due_ms <= now_ms => {}
                _ => break,
            }
            if let Some(Reverse(pc)) = self.pending_cancels.pop() {
                self.cancel_now(&pc.order_id);
            }
        }

        loop {
            match self.pending_submits.peek() {
                Some(Reverse(ps)) if ps.due_ms <= now_ms => {}
                _ => break,
            }
            if let Some(Reverse(ps)) = self.pending_submits.pop() {
                if self.submit_canceled(&ps.order, ps.seq) {
                    // Lazily canceled before activation.
                    continue;
                }
                self.submit_now(ps.order, books, now_ms)?;
            }
        }
        Ok(())
    }

    /// Submit an order. With `submit_latency_ms > 0` the order is queued and
    /// activated later by `on_time`.
    pub fn submit(&mut self, order: Order, books: &mut Books, now_ms: i64) -> SimResult<()> {
        if self.cfg.submit_latency_ms > 0 {
            self.seq += 1;
            self.pending_submits.push(Reverse(PendingSubmit {
                due_ms: now_ms + self.cfg.submit_latency_ms,
                seq: self.seq,
                order,
            }));
            return Ok(());
        }
        self.submit_now(order, books, now_ms)
    }

    fn submit_now(&mut self, order: Order, books: &mut Books, now_ms: i64) -> SimResult<()> {
        if order.order_type == OrderType::Market {
            self.fill_taker(&order, books, now_ms, None)?;
            return Ok(());
        }

        let Some(limit_px) = order.price else {
            return Err(SimError::Data(format!("limit order {} has no price", order.id)));
        };

        let (best_bid, best_ask) = {
            let book = books.book(&order.symbol);
            (book.best_bid(), book.best_ask())
        };
        // Buy crosses if it reaches the ask; sell crosses if it reaches the bid.
        let crosses = match order.side {
            Side::Buy => best_ask.is_some_and(|a| limit_px >= a),
            Side::Sell => best_bid.is_some_and(|b| limit_px <= b),
        };

        if order.post_only {
            // Post-only orders that would execute immediately are rejected.
            if crosses {
                return Ok(());
            }
            self.open_maker(order, limit_px, books);
            return Ok(());
        }

        if order.time_in_force == TimeInForce::Ioc {
            self.fill_taker(&order, books, now_ms, Some(limit_px))?;
            return Ok(());
        }

        // GTC limit: execute the crossing part immediately, rest the rest.
        if crosses {
            let (_, filled_qty) = self.fill_taker(&order, books, now_ms, Some(limit_px))?;
            let remaining = order.quantity - filled_qty;
            if remaining > 0.0 {
                let mut rest = order;
                rest.quantity = remaining;
                self.open_maker(rest, limit_px, books);
            }
            return Ok(());
        }

        self.open_maker(order, limit_px, books);
        Ok(())
    }

    fn open_maker(&mut self, order: Order, limit_px: f64, books: &mut Books) {
        let visible = books
            .book(&order.symbol)
            .level_qty(BookSide::for_maker(order.side), limit_px);
        let q_ahead =
            visible * self.cfg.maker_queue_ahead_factor + self.cfg.maker_queue_ahead_extra_qty;

        let key: LevelKey = (order.symbol.clone(), order.side, price_key(limit_px));
        self.maker_orders.insert(
            order.id.clone(),
            MakerQueueOrder {
                symbol: order.symbol,
                side: order.side,
                price: limit_px,
                quantity: order.quantity,
                filled_qty: 0.0,
                queue_ahead_qty: q_ahead,
                trade_participation: self.cfg.maker_trade_participation,
                priority_seq: self.maker_seq,
            },
        );
        self.maker_level_index.entry(key.clone()).or_default().push(order.id.clone());
        self.maker_order_level_key.insert(order.id, key);
        self.maker_seq += 1;
    }

    fn fill_taker(
        &mut self,
        order: &Order,
        books: &mut Books,
        now_ms: i64,
        limit_price: Option<f64>,
    ) -> SimResult<(f64, f64)> {
        let (pre_bid, pre_ask, avg_px, filled_qty) = {
            let book = books.book(&order.symbol);
            let pre_bid = book.best_bid();
            let pre_ask = book.best_ask();
            let (avg_px, filled_qty) =
                consume_taker_fill(book, order.side, order.quantity, limit_price)?;
            (pre_bid, pre_ask, avg_px, filled_qty)
        };
        if filled_qty <= 0.0 || avg_px.is_nan() {
            return Ok((avg_px, 0.0));
        }

        let exec_px = self.taker_exec_price(order.side, avg_px, pre_bid, pre_ask, limit_price);
        let fee = filled_qty * exec_px * self.cfg.taker_fee_frac;
        self.portfolio.apply_fill(&order.symbol, order.side, filled_qty, exec_px, fee);
        self.fills.push(Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: filled_qty,
            price: exec_px,
            fee_usdt: fee,
            event_time_ms: now_ms,
            liquidity: Liquidity::Taker,
        });
        Ok((exec_px, filled_qty))
    }

    /// Slippage overlay on the raw walk price, bounded by limit semantics:
    /// a buy never executes above its limit, a sell never below.
    fn taker_exec_price(
        &self,
        side: Side,
        raw_exec_price: f64,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
        limit_price: Option<f64>,
    ) -> f64 {
        if raw_exec_price <= 0.0 {
            return raw_exec_price;
        }

        let spread = match (best_bid, best_ask) {
            (Some(b), Some(a)) if a >= b => a - b,
            _ => 0.0,
        };
        let slip = self.cfg.taker_slippage_abs
            + raw_exec_price * self.cfg.taker_slippage_bps / 10_000.0
            + spread * self.cfg.taker_slippage_spread_frac;

        let mut out = if slip <= 0.0 {
            raw_exec_price
        } else if side.is_buy() {
            raw_exec_price + slip
        } else {
            (raw_exec_price - slip).max(0.0)
        };

        if let Some(lp) = limit_price {
            out = if side.is_buy() { out.min(lp) } else { out.max(lp) };
        }
        out
    }

    /// Apply a depth increment to the book, then progress maker queues on
    /// every touched level of the matching side (shrink-only).
    pub fn on_depth_update(&mut self, update: &DepthUpdate, books: &mut Books) {
        books
            .book(&update.symbol)
            .apply_depth_update(&update.bid_updates, &update.ask_updates);

        for &(p, q) in &update.bid_updates {
            self.on_depth_level_qty(&update.symbol, Side::Buy, p, q);
        }
        for &(p, q) in &update.ask_updates {
            self.on_depth_level_qty(&update.symbol, Side::Sell, p, q);
        }
    }

    /// Progress makers resting at the trade's exact price level, oldest
    /// first, sharing the trade's volume as a budget across the level.
    pub fn on_trade(&mut self, trade: &Trade, now_ms: i64) {
        let maker_side = if trade.is_buyer_maker { Side::Buy } else { Side::Sell };
        let key: LevelKey = (trade.symbol.clone(), maker_side, price_key(trade.price));
        let Some(bucket) = self.maker_level_index.get(&key) else {
            return;
        };
        let ids: Vec<String> = bucket.clone();

        let mut remaining_trade_qty = trade.quantity;
        let mut active_ids: Vec<String> = Vec::with_capacity(ids.len());

        for order_id in &ids {
            let Some(mo) = self.maker_orders.get_mut(order_id) else {
                continue;
            };

            let mut fill_qty = 0.0;
            if remaining_trade_qty > 0.0 {
                let (f, consumed) = mo.on_trade_budgeted(trade, Some(remaining_trade_qty));
                fill_qty = f;
                if consumed > 0.0 {
                    remaining_trade_qty = (remaining_trade_qty - consumed).max(0.0);
                }
            }

            let symbol = mo.symbol.clone();
            let side = mo.side;
            let filled_out = mo.is_filled();

            if fill_qty > 0.0 {
                let fee = fill_qty * trade.price * self.cfg.maker_fee_frac;
                self.portfolio.apply_fill(&symbol, side, fill_qty, trade.price, fee);
                self.fills.push(Fill {
                    order_id: order_id.clone(),
                    symbol,
                    side,
                    quantity: fill_qty,
                    price: trade.price,
                    fee_usdt: fee,
                    event_time_ms: now_ms,
                    liquidity: Liquidity::Maker,
                });
            }

            if filled_out {
                self.maker_orders.remove(order_id);
                self.maker_order_level_key.remove(order_id);
            } else {
                active_ids.push(order_id.clone());
            }
        }

        if active_ids.is_empty() {
            self.maker_level_index.remove(&key);
        } else {
            self.maker_level_index.insert(key, active_ids);
        }
    }

    /// Cancel an order. With `cancel_latency_ms > 0` and a current time, the
    /// cancel is queued and applied by `on_time`.
    pub fn cancel(&mut self, order_id: &str, now_ms: Option<i64>) {
        if self.cfg.cancel_latency_ms > 0 {
            if let Some(now) = now_ms {
                self.seq += 1;
                self.pending_cancels.push(Reverse(PendingCancel {
                    due_ms: now + self.cfg.cancel_latency_ms,
                    seq: self.seq,
                    order_id: order_id.to_string(),
                }));
                return;
            }
        }
        self.cancel_now(order_id);
    }

    fn cancel_now(&mut self, order_id: &str) {
        self.maker_orders.remove(order_id);
        self.remove_order_from_level_index(order_id);
        // Also lazily cancel a submitted-but-not-activated order with the
        // same id: record the current sequence watermark as its cutoff.
        let cutoff = self.cancel_cutoff_by_order.entry(order_id.to_string()).or_insert(0);
        *cutoff = (*cutoff).max(self.seq);
    }

    /// Cancel broker state tied to one symbol: active makers and/or pending
    /// submits enqueued up to the current sequence watermark.
    pub fn cancel_symbol_orders(
        &mut self,
        symbol: &str,
        cancel_active_makers: bool,
        cancel_pending_submits: bool,
    ) {
        if cancel_active_makers {
            let ids: Vec<String> = self
                .maker_orders
                .iter()
                .filter(|(_, mo)| mo.symbol == symbol)
                .map(|(id, _)| id.clone())
                .collect();
            for id in ids {
                self.cancel_now(&id);
            }
        }

        if cancel_pending_submits {
            let cutoff = self.cancel_cutoff_by_symbol.entry(symbol.to_string()).or_insert(0);
            *cutoff = (*cutoff).max(self.seq);
            debug!(symbol, cutoff = *cutoff, "symbol cancel watermark recorded");
        }
    }

    fn submit_canceled(&self, order: &Order, submit_seq: u64) -> bool {
        let by_order = self.cancel_cutoff_by_order.get(&order.id).copied().unwrap_or(0);
        let by_symbol = self.cancel_cutoff_by_symbol.get(&order.symbol).copied().unwrap_or(0);
        submit_seq <= by_order.max(by_symbol)
    }

    /// Whether any submit is still pending activation (not lazily canceled),
    /// optionally restricted to one symbol.
    pub fn has_pending_orders(&self, symbol: Option<&str>) -> bool {
        self.pending_submits.iter().any(|Reverse(ps)| {
            symbol.is_none_or(|s| ps.order.symbol == s) && !self.submit_canceled(&ps.order, ps.seq)
        })
    }

    pub fn has_open_orders(&self) -> bool {
        !self.maker_orders.is_empty() || self.has_pending_orders(None)
    }

    pub fn maker_order(&self, order_id: &str) -> Option<&MakerQueueOrder> {
        self.maker_orders.get(order_id)
    }

    pub fn active_maker_count(&self) -> usize {
        self.maker_orders.len()
    }

    fn on_depth_level_qty(&mut self, symbol: &str, maker_side: Side, price: f64, new_qty: f64) {
        let key: LevelKey = (symbol.to_string(), maker_side, price_key(price));
        let Some(bucket) = self.maker_level_index.get(&key) else {
            return;
        };
        let ids: Vec<String> = bucket.clone();

        let mut active_ids: Vec<String> = Vec::with_capacity(ids.len());
        for order_id in &ids {
            let Some(mo) = self.maker_orders.get_mut(order_id) else {
                continue;
            };
            mo.on_book_qty_update(new_qty);
            if mo.is_filled() {
                self.maker_orders.remove(order_id);
                self.maker_order_level_key.remove(order_id);
            } else {
                active_ids.push(order_id.clone());
            }
        }

        if active_ids.is_empty() {
            self.maker_level_index.remove(&key);
        } else {
            self.maker_level_index.insert(key, active_ids);
        }
    }

    fn remove_order_from_level_index(&mut self, order_id: &str) {
        let Some(key) = self.maker_order_level_key.remove(order_id) else {
            return;
        };
        if let Some(bucket) = self.maker_level_index.get_mut(&key) {
            bucket.retain(|oid| oid != order_id);
            if bucket.is_empty() {
                self.maker_level_index.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{books_with, depth, trade};

    fn zero_fee_broker() -> SimBroker {
        SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            ..BrokerConfig::default()
        })
        .unwrap()
    }

    /// Scenario: Asks 1@100, 1@101; market buy of 1.5 with slip_abs=5.
    /// Expected: Raw avg (100 + 101·0.5)/1.5 plus the +5 overlay; filled
    /// 1.5; fee charged on the executed price.
    #[test]
    fn test_market_buy_with_abs_slippage() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            taker_slippage_abs: 5.0,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(99.0, 1.0)], &[(100.0, 1.0), (101.0, 1.0)]);

        broker
            .submit(Order::market("t1", "BTCUSDT", Side::Buy, 1.5), &mut books, 1_000)
            .unwrap();

        assert_eq!(broker.fills.len(), 1);
        let f = &broker.fills[0];
        let raw = (100.0 + 101.0 * 0.5) / 1.5;
        assert!((f.quantity - 1.5).abs() < 1e-12);
        assert!((f.price - (raw + 5.0)).abs() < 1e-9);
        assert_eq!(f.liquidity, Liquidity::Taker);
        assert_eq!(f.event_time_ms, 1_000);
    }

    /// Scenario: Same book; limit-IOC buy at 101 with slip_abs=5.
    /// Expected: Execution price capped at the 101 limit.
    #[test]
    fn test_ioc_slippage_capped_by_limit() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            taker_slippage_abs: 5.0,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[], &[(100.0, 1.0), (101.0, 1.0)]);

        let mut order = Order::limit("t1", "BTCUSDT", Side::Buy, 1.5, 101.0);
        order.time_in_force = TimeInForce::Ioc;
        broker.submit(order, &mut books, 1_000).unwrap();

        assert_eq!(broker.fills.len(), 1);
        assert!((broker.fills[0].price - 101.0).abs() < 1e-12);
        assert!((broker.fills[0].quantity - 1.5).abs() < 1e-12);
    }

    /// Scenario: Sell-side slippage on a market sell.
    /// Expected: Overlay subtracts from the raw price, floored at zero.
    #[test]
    fn test_market_sell_slippage_subtracts() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            taker_slippage_abs: 1.0,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(100.0, 1.0)], &[(101.0, 1.0)]);

        broker
            .submit(Order::market("s1", "BTCUSDT", Side::Sell, 1.0), &mut books, 0)
            .unwrap();
        assert!((broker.fills[0].price - 99.0).abs() < 1e-12);
    }

    /// Scenario: Post-only bid at a price that crosses the ask.
    /// Expected: Rejected silently; no fills, no maker state.
    #[test]
    fn test_post_only_crossing_rejected() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[(99.0, 1.0)], &[(100.0, 1.0)]);

        let mut order = Order::limit("p1", "BTCUSDT", Side::Buy, 1.0, 100.0);
        order.post_only = true;
        broker.submit(order, &mut books, 0).unwrap();

        assert!(broker.fills.is_empty());
        assert!(!broker.has_open_orders());
    }

    /// Scenario: Post-only bid below the ask.
    /// Expected: Rests as a maker with queue ahead from the visible level.
    #[test]
    fn test_post_only_rests_with_queue_ahead() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[(99.0, 7.0)], &[(100.0, 1.0)]);

        let mut order = Order::limit("p1", "BTCUSDT", Side::Buy, 1.0, 99.0);
        order.post_only = true;
        broker.submit(order, &mut books, 0).unwrap();

        let mo = broker.maker_order("p1").unwrap();
        assert!((mo.queue_ahead_qty - 7.0).abs() < 1e-12);
        assert!(broker.has_open_orders());
    }

    /// Scenario: Queue-ahead scaling knobs.
    /// Expected: queue_ahead = visible·factor + extra.
    #[test]
    fn test_queue_ahead_factor_and_extra() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            maker_queue_ahead_factor: 0.5,
            maker_queue_ahead_extra_qty: 2.0,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(99.0, 10.0)], &[(100.0, 1.0)]);

        broker
            .submit(Order::limit("m1", "BTCUSDT", Side::Buy, 1.0, 99.0), &mut books, 0)
            .unwrap();
        let mo = broker.maker_order("m1").unwrap();
        assert!((mo.queue_ahead_qty - 7.0).abs() < 1e-12);
    }

    /// Scenario: GTC limit buy at 101 against asks 1@100, 1@101 for 3 units.
    /// Expected: 2 fill as taker up to the limit; the remaining 1 rests as a
    /// maker at 101.
    #[test]
    fn test_gtc_crossing_fills_then_rests_remainder() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[], &[(100.0, 1.0), (101.0, 1.0)]);

        broker
            .submit(Order::limit("g1", "BTCUSDT", Side::Buy, 3.0, 101.0), &mut books, 0)
            .unwrap();

        assert_eq!(broker.fills.len(), 1);
        assert!((broker.fills[0].quantity - 2.0).abs() < 1e-12);
        let mo = broker.maker_order("g1").unwrap();
        assert!((mo.quantity - 1.0).abs() < 1e-12);
        assert!((mo.price - 101.0).abs() < 1e-12);
    }

    /// Scenario: Resting bid 1@100 with visible ahead 10. Depth update drops
    /// the level to 3, then a sell-aggressor trade of 5 arrives at 100.
    /// Expected: Queue shrinks to 3 on the depth update; the trade consumes
    /// the queue and fills our full 1.0 as maker.
    #[test]
    fn test_maker_fill_after_depth_shrink_and_trade() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[(100.0, 10.0)], &[(105.0, 1.0)]);

        let mut order = Order::limit("m1", "BTCUSDT", Side::Buy, 1.0, 100.0);
        order.post_only = true;
        broker.submit(order, &mut books, 0).unwrap();
        assert!((broker.maker_order("m1").unwrap().queue_ahead_qty - 10.0).abs() < 1e-12);

        broker.on_depth_update(&depth(1_000, "BTCUSDT", 2, 1, &[(100.0, 3.0)], &[]), &mut books);
        assert!((broker.maker_order("m1").unwrap().queue_ahead_qty - 3.0).abs() < 1e-12);

        broker.on_trade(&trade(2_000, "BTCUSDT", 1, 100.0, 5.0, true), 2_000);
        assert_eq!(broker.fills.len(), 1);
        let f = &broker.fills[0];
        assert!((f.quantity - 1.0).abs() < 1e-12);
        assert_eq!(f.liquidity, Liquidity::Maker);
        assert!(broker.maker_order("m1").is_none());
        assert!((broker.portfolio.position_qty("BTCUSDT") - 1.0).abs() < 1e-12);
    }

    /// Scenario: Two makers at the same level, placed in order, hit by one
    /// trade whose volume only covers the first.
    /// Expected: Budget is consumed oldest-first; the second maker receives
    /// nothing from this trade.
    #[test]
    fn test_shared_trade_budget_respects_priority() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[(100.0, 0.0)], &[(105.0, 1.0)]);

        for id in ["first", "second"] {
            let mut order = Order::limit(id, "BTCUSDT", Side::Buy, 2.0, 100.0);
            order.post_only = true;
            broker.submit(order, &mut books, 0).unwrap();
        }

        broker.on_trade(&trade(1_000, "BTCUSDT", 1, 100.0, 2.0, true), 1_000);

        assert_eq!(broker.fills.len(), 1);
        assert_eq!(broker.fills[0].order_id, "first");
        assert!((broker.fills[0].quantity - 2.0).abs() < 1e-12);
        // Budget exhausted; the younger maker is untouched.
        let second = broker.maker_order("second").unwrap();
        assert_eq!(second.filled_qty, 0.0);
    }

    /// Scenario: Maker fee accounting on a maker fill.
    /// Expected: fee = maker_fee · qty · trade price, charged to the
    /// portfolio.
    #[test]
    fn test_maker_fee_charged() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.001,
            taker_fee_frac: 0.0,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(100.0, 0.0)], &[(105.0, 1.0)]);

        let mut order = Order::limit("m1", "BTCUSDT", Side::Buy, 1.0, 100.0);
        order.post_only = true;
        broker.submit(order, &mut books, 0).unwrap();
        broker.on_trade(&trade(1_000, "BTCUSDT", 1, 100.0, 2.0, true), 1_000);

        assert!((broker.fills[0].fee_usdt - 0.1).abs() < 1e-12);
        assert!((broker.portfolio.fees_paid_usdt - 0.1).abs() < 1e-12);
    }

    /// Scenario: Submit latency 100ms; submit at t=10, advance to t=50, then
    /// t=120.
    /// Expected: No fill before the due time; activation happens on the
    /// first on_time at/after t=110.
    #[test]
    fn test_submit_latency_defers_activation() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            submit_latency_ms: 100,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(99.0, 1.0)], &[(100.0, 5.0)]);

        broker
            .submit(Order::market("l1", "BTCUSDT", Side::Buy, 1.0), &mut books, 10)
            .unwrap();
        assert!(broker.has_pending_orders(Some("BTCUSDT")));

        broker.on_time(50, &mut books).unwrap();
        assert!(broker.fills.is_empty());

        broker.on_time(120, &mut books).unwrap();
        assert_eq!(broker.fills.len(), 1);
        assert_eq!(broker.fills[0].event_time_ms, 120);
        assert!(!broker.has_pending_orders(None));
    }

    /// Scenario: Cancel by id while the submit is still pending.
    /// Expected: The pending submit is discarded at activation time; no
    /// fill.
    #[test]
    fn test_cancel_before_activation_discards_submit() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            submit_latency_ms: 100,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(99.0, 1.0)], &[(100.0, 5.0)]);

        broker
            .submit(Order::market("l1", "BTCUSDT", Side::Buy, 1.0), &mut books, 10)
            .unwrap();
        broker.cancel("l1", None);
        assert!(!broker.has_pending_orders(None));

        broker.on_time(200, &mut books).unwrap();
        assert!(broker.fills.is_empty());
    }

    /// Scenario: Symbol-wide cancel with one active maker and one pending
    /// submit for the symbol.
    /// Expected: The maker is dropped immediately and the pending submit is
    /// lazily discarded.
    #[test]
    fn test_cancel_symbol_orders_covers_makers_and_pending() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            submit_latency_ms: 100,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(99.0, 1.0)], &[(100.0, 5.0)]);

        broker
            .submit(Order::market("pending", "BTCUSDT", Side::Buy, 1.0), &mut books, 0)
            .unwrap();
        broker.on_time(150, &mut books).unwrap();
        assert_eq!(broker.fills.len(), 1);

        // Rest a maker directly (no latency on an already-active broker by
        // re-submitting after the first activation drained the queue).
        let mut order = Order::limit("m1", "BTCUSDT", Side::Buy, 1.0, 99.0);
        order.post_only = true;
        broker.submit(order, &mut books, 150).unwrap();
        broker
            .submit(Order::market("p2", "BTCUSDT", Side::Buy, 1.0), &mut books, 150)
            .unwrap();

        broker.cancel_symbol_orders("BTCUSDT", true, true);
        broker.on_time(400, &mut books).unwrap();

        // Maker gone, pending submit (p2, was still queued) dropped, and the
        // earlier fill count unchanged. m1 was queued too and also dropped.
        assert_eq!(broker.fills.len(), 1);
        assert!(!broker.has_open_orders());
    }

    /// Scenario: Cancel latency 50ms; cancel issued at t=0 with a submit due
    /// at the same drain time t=60.
    /// Expected: Cancels drain before submits at the same on_time call, so
    /// the maker is gone and the pending submit for the same id is cut off.
    #[test]
    fn test_cancels_drain_before_submits() {
        let mut broker = SimBroker::new(BrokerConfig {
            maker_fee_frac: 0.0,
            taker_fee_frac: 0.0,
            submit_latency_ms: 60,
            cancel_latency_ms: 60,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut books = books_with("BTCUSDT", &[(99.0, 1.0)], &[(100.0, 5.0)]);

        broker
            .submit(Order::market("o1", "BTCUSDT", Side::Buy, 1.0), &mut books, 0)
            .unwrap();
        broker.cancel("o1", Some(0));

        broker.on_time(60, &mut books).unwrap();
        assert!(broker.fills.is_empty());
        assert!(!broker.has_open_orders());
    }

    /// Scenario: IOC limit buy at 100 for 3 units against 1@100 only.
    /// Expected: The unfilled remainder is discarded, never rested.
    #[test]
    fn test_ioc_remainder_is_discarded() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[], &[(100.0, 1.0), (101.0, 5.0)]);

        let mut order = Order::limit("i1", "BTCUSDT", Side::Buy, 3.0, 100.0);
        order.time_in_force = TimeInForce::Ioc;
        broker.submit(order, &mut books, 0).unwrap();

        assert_eq!(broker.fills.len(), 1);
        assert!((broker.fills[0].quantity - 1.0).abs() < 1e-12);
        assert!(!broker.has_open_orders());
    }

    /// Scenario: Market order into an empty book.
    /// Expected: No fill, no position, no error.
    #[test]
    fn test_market_order_empty_book_fills_nothing() {
        let mut broker = zero_fee_broker();
        let mut books = Books::new();
        broker
            .submit(Order::market("m1", "BTCUSDT", Side::Buy, 1.0), &mut books, 0)
            .unwrap();
        assert!(broker.fills.is_empty());
        assert!(broker.portfolio.position("BTCUSDT").is_none());
    }

    /// Scenario: Cancel an active maker, then a trade arrives at its level.
    /// Expected: The canceled order is gone from the level index and never
    /// fills.
    #[test]
    fn test_cancel_active_maker_stops_fills() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[(100.0, 0.0)], &[(105.0, 1.0)]);

        let mut order = Order::limit("m1", "BTCUSDT", Side::Buy, 1.0, 100.0);
        order.post_only = true;
        broker.submit(order, &mut books, 0).unwrap();
        assert!(broker.has_open_orders());

        broker.cancel("m1", None);
        assert!(!broker.has_open_orders());

        broker.on_trade(&trade(1_000, "BTCUSDT", 1, 100.0, 10.0, true), 1_000);
        assert!(broker.fills.is_empty());
    }

    /// Scenario: Two makers at one level and a trade large enough to fill
    /// the first fully and the second partially.
    /// Expected: The budget flows oldest-first and the leftover fills the
    /// younger maker partially.
    #[test]
    fn test_trade_budget_spills_to_younger_maker() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[(100.0, 0.0)], &[(105.0, 1.0)]);

        for id in ["first", "second"] {
            let mut order = Order::limit(id, "BTCUSDT", Side::Buy, 2.0, 100.0);
            order.post_only = true;
            broker.submit(order, &mut books, 0).unwrap();
        }

        broker.on_trade(&trade(1_000, "BTCUSDT", 1, 100.0, 3.0, true), 1_000);

        assert_eq!(broker.fills.len(), 2);
        assert_eq!(broker.fills[0].order_id, "first");
        assert!((broker.fills[0].quantity - 2.0).abs() < 1e-12);
        assert_eq!(broker.fills[1].order_id, "second");
        assert!((broker.fills[1].quantity - 1.0).abs() < 1e-12);
        assert!((broker.maker_order("second").unwrap().remaining_qty() - 1.0).abs() < 1e-12);
    }

    /// Scenario: Invalid broker knobs.
    /// Expected: Construction fails fast with a configuration error.
    #[test]
    fn test_invalid_config_rejected() {
        for cfg in [
            BrokerConfig { taker_slippage_bps: -1.0, ..BrokerConfig::default() },
            BrokerConfig { taker_slippage_abs: -0.1, ..BrokerConfig::default() },
            BrokerConfig { maker_trade_participation: 0.0, ..BrokerConfig::default() },
            BrokerConfig { maker_trade_participation: 1.5, ..BrokerConfig::default() },
            BrokerConfig { maker_queue_ahead_factor: -0.5, ..BrokerConfig::default() },
        ] {
            assert!(SimBroker::new(cfg).is_err());
        }
    }

    /// Scenario: Depth updates touching a level other than the maker's.
    /// Expected: The maker's queue is untouched (dispatch is bucket-local).
    #[test]
    fn test_depth_dispatch_is_level_local() {
        let mut broker = zero_fee_broker();
        let mut books = books_with("BTCUSDT", &[(100.0, 10.0), (99.0, 10.0)], &[(105.0, 1.0)]);

        let mut order = Order::limit("m1", "BTCUSDT", Side::Buy, 1.0, 100.0);
        order.post_only = true;
        broker.submit(order, &mut books, 0).unwrap();

        broker.on_depth_update(&depth(1_000, "BTCUSDT", 2, 1, &[(99.0, 1.0)], &[]), &mut books);
        assert!((broker.maker_order("m1").unwrap().queue_ahead_qty - 10.0).abs() < 1e-12);

        // Ask-side updates at the same price key don't touch bid makers.
        broker.on_depth_update(&depth(1_100, "BTCUSDT", 3, 2, &[], &[(100.0, 0.5)]), &mut books);
        assert!((broker.maker_order("m1").unwrap().queue_ahead_qty - 10.0).abs() < 1e-12);
    }

    /// Scenario: Fill serialization for downstream export.
    /// Expected: Lowercase side/liquidity tags in the JSON payload.
    #[test]
    fn test_fill_serializes_lowercase_tags() {
        let fill = Fill {
            order_id: "o1".into(),
            symbol: "BTCUSDT".into(),
            side: Side::Sell,
            quantity: 1.0,
            price: 100.0,
            fee_usdt: 0.05,
            event_time_ms: 42,
            liquidity: Liquidity::Maker,
        };
        let json = serde_json::to_string(&fill).unwrap();
        assert!(json.contains("\"side\":\"sell\""));
        assert!(json.contains("\"liquidity\":\"maker\""));
    }
}
