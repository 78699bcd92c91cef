//! Incrementally maintained L2 order book.
//!
//! Levels are keyed by fixed-point integer prices (`price_key`) so identity
//! survives float round-trips. Best-level extraction uses lazy heaps: a
//! removed level leaves its heap entry behind, and stale tops are discarded
//! on access. A per-side membership set records which keys are already in
//! the heap, so neither in-place updates nor remove/re-add churn can grow
//! the heap beyond one entry per price.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::types::{price_key, Side};

/// Quantities at or below this are treated as an empty level.
pub(crate) const EPS_QTY: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    /// Book side a resting order of the given order side sits on.
    #[inline]
    pub fn for_maker(side: Side) -> BookSide {
        match side {
            Side::Buy => BookSide::Bid,
            Side::Sell => BookSide::Ask,
        }
    }

    /// Book side consumed by an aggressive order of the given side.
    #[inline]
    pub fn for_taker(side: Side) -> BookSide {
        match side {
            Side::Buy => BookSide::Ask,
            Side::Sell => BookSide::Bid,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Level {
    price: f64,
    qty: f64,
}

#[derive(Clone, Debug, Default)]
pub struct L2Book {
    bids: HashMap<i64, Level>,
    asks: HashMap<i64, Level>,
    bid_heap: BinaryHeap<i64>,
    ask_heap: BinaryHeap<Reverse<i64>>,
    bid_in_heap: HashSet<i64>,
    ask_in_heap: HashSet<i64>,
}

impl L2Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set, update or remove one price level. Quantities at or below epsilon
    /// remove the level; the heap entry stays behind and is pruned lazily.
    pub fn apply_level(&mut self, side: BookSide, price: f64, qty: f64) {
        let key = price_key(price);
        match side {
            BookSide::Bid => {
                if qty <= EPS_QTY {
                    self.bids.remove(&key);
                } else {
                    self.bids.insert(key, Level { price, qty });
                    if self.bid_in_heap.insert(key) {
                        self.bid_heap.push(key);
                    }
                }
            }
            BookSide::Ask => {
                if qty <= EPS_QTY {
                    self.asks.remove(&key);
                } else {
                    self.asks.insert(key, Level { price, qty });
                    if self.ask_in_heap.insert(key) {
                        self.ask_heap.push(Reverse(key));
                    }
                }
            }
        }
    }

    /// Apply one depth increment (both sides).
    pub fn apply_depth_update(&mut self, bid_updates: &[(f64, f64)], ask_updates: &[(f64, f64)]) {
        for &(p, q) in bid_updates {
            self.apply_level(BookSide::Bid, p, q);
        }
        for &(p, q) in ask_updates {
            self.apply_level(BookSide::Ask, p, q);
        }
    }

    /// Highest bid price, discarding stale heap entries. Amortized O(log n).
    pub fn best_bid(&mut self) -> Option<f64> {
        while let Some(&key) = self.bid_heap.peek() {
            if let Some(level) = self.bids.get(&key) {
                return Some(level.price);
            }
            self.bid_heap.pop();
            self.bid_in_heap.remove(&key);
        }
        None
    }

    /// Lowest ask price, discarding stale heap entries. Amortized O(log n).
    pub fn best_ask(&mut self) -> Option<f64> {
        while let Some(&Reverse(key)) = self.ask_heap.peek() {
            if let Some(level) = self.asks.get(&key) {
                return Some(level.price);
            }
            self.ask_heap.pop();
            self.ask_in_heap.remove(&key);
        }
        None
    }

    pub fn mid_price(&mut self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Visible quantity at an exact price, 0.0 when the level is absent.
    #[inline]
    pub fn level_qty(&self, side: BookSide, price: f64) -> f64 {
        let key = price_key(price);
        let map = match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        };
        map.get(&key).map_or(0.0, |l| l.qty)
    }

    /// Number of live levels on one side.
    #[inline]
    pub fn depth(&self, side: BookSide) -> usize {
        match side {
            BookSide::Bid => self.bids.len(),
            BookSide::Ask => self.asks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Drop all levels, heaps and membership sets, so no stale best-level
    /// artifacts survive a reset.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.bid_heap.clear();
        self.ask_heap.clear();
        self.bid_in_heap.clear();
        self.ask_in_heap.clear();
    }

    /// Average execution price for consuming `notional` quote units from the
    /// opposite side of `side`, walking levels in price order.
    ///
    /// Walks at most `max_levels` levels first (opportunistic fast path) and
    /// retries with unlimited depth when that was not enough. Returns NaN if
    /// the whole side cannot cover the notional.
    pub fn impact_vwap(&self, side: Side, notional: f64, max_levels: usize) -> f64 {
        let out = self.impact_vwap_walk(side, notional, Some(max_levels));
        if out.is_nan() {
            return self.impact_vwap_walk(side, notional, None);
        }
        out
    }

    fn impact_vwap_walk(&self, side: Side, notional: f64, max_levels: Option<usize>) -> f64 {
        if notional <= 0.0 {
            return f64::NAN;
        }

        let book_side = BookSide::for_taker(side);
        let mut prices: Vec<f64> = match book_side {
            BookSide::Ask => self.asks.values().map(|l| l.price).collect(),
            BookSide::Bid => self.bids.values().map(|l| l.price).collect(),
        };
        prices.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if !side.is_buy() {
            prices.reverse();
        }

        let mut remaining = notional;
        let mut qty_acc = 0.0;
        for (i, price) in prices.iter().copied().enumerate() {
            if let Some(cap) = max_levels {
                if i >= cap {
                    break;
                }
            }
            let level_notional = self.level_qty(book_side, price) * price;
            let take = level_notional.min(remaining);
            qty_acc += take / price;
            remaining -= take;
            if remaining <= 0.0 {
                break;
            }
        }

        if remaining > EPS_QTY || qty_acc <= 0.0 {
            return f64::NAN;
        }
        notional / qty_acc
    }
}

// ─── Book container ─────────────────────────────────────────────────────────

/// Per-symbol books, created lazily on first reference.
#[derive(Clone, Debug, Default)]
pub struct Books {
    map: HashMap<String, L2Book>,
}

impl Books {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(&mut self, symbol: &str) -> &mut L2Book {
        self.map.entry(symbol.to_string()).or_default()
    }

    pub fn get(&self, symbol: &str) -> Option<&L2Book> {
        self.map.get(symbol)
    }
}
