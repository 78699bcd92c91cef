//! Broker wrapper that blocks submits while the local book looks invalid.
//!
//! Tracks depth-sequence continuity, staleness, crossed books and spread
//! per symbol. A trip extends a cooldown, restarts the warmup counter and,
//! when reset is enabled for the reason, clears the book and cancels the
//! symbol's orders (active makers dropped, pending submits lazily cut off).

use std::collections::HashMap;

use tracing::warn;

use crate::book::Books;
use crate::broker::SimBroker;
use crate::error::SimResult;
use crate::execution::Order;
use crate::types::{DepthUpdate, Trade};

#[derive(Clone, Debug)]
pub struct BookGuardConfig {
    pub enabled: bool,
    /// Absolute spread ceiling; None disables the check.
    pub max_spread: Option<f64>,
    /// Spread ceiling in basis points of mid; None disables the check.
    pub max_spread_bps: Option<f64>,
    pub cooldown_ms: i64,
    pub warmup_depth_updates: u32,
    /// Max age of the last depth event before submits are considered stale;
    /// 0 disables the check.
    pub max_staleness_ms: i64,
    pub reset_on_mismatch: bool,
    pub reset_on_crossed: bool,
    pub reset_on_missing_side: bool,
    pub reset_on_spread: bool,
    pub reset_on_stale: bool,
}

impl Default for BookGuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_spread: None,
            max_spread_bps: Some(5.0),
            cooldown_ms: 1_000,
            warmup_depth_updates: 1_000,
            max_staleness_ms: 500,
            reset_on_mismatch: true,
            reset_on_crossed: true,
            reset_on_missing_side: false,
            reset_on_spread: false,
            reset_on_stale: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TripReason {
    Mismatch,
    Crossed,
    MissingSide,
    Spread,
    Stale,
}

impl TripReason {
    fn as_str(self) -> &'static str {
        match self {
            TripReason::Mismatch => "mismatch",
            TripReason::Crossed => "crossed",
            TripReason::MissingSide => "missing_side",
            TripReason::Spread => "spread",
            TripReason::Stale => "stale",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BookGuardStats {
    pub resets: u64,
    pub mismatch_trips: u64,
    pub cross_trips: u64,
    pub missing_side_trips: u64,
    pub spread_trips: u64,
    pub stale_trips: u64,

    pub blocked_submits: u64,
    pub blocked_cooldown: u64,
    pub blocked_warmup: u64,
    pub blocked_stale: u64,
    pub blocked_missing_side: u64,
    pub blocked_crossed: u64,
    pub blocked_spread: u64,
}

/// SimBroker wrapper. When `symbol` is set, guard checks apply only to that
/// symbol; everything else passes straight through.
#[derive(Clone, Debug)]
pub struct BookGuardedBroker {
    pub inner: SimBroker,
    pub cfg: BookGuardConfig,
    pub stats: BookGuardStats,
    symbol: Option<String>,

    blocked_until_ms: HashMap<String, i64>,
    warmup_remaining: HashMap<String, u32>,
    last_final_update_id: HashMap<String, i64>,
    last_depth_event_ms: HashMap<String, i64>,
}

impl BookGuardedBroker {
    pub fn new(inner: SimBroker, symbol: Option<String>, cfg: BookGuardConfig) -> Self {
        Self {
            inner,
            cfg,
            stats: BookGuardStats::default(),
            symbol,
            blocked_until_ms: HashMap::new(),
            warmup_remaining: HashMap::new(),
            last_final_update_id: HashMap::new(),
            last_depth_event_ms: HashMap::new(),
        }
    }

    fn symbol_applies(&self, symbol: &str) -> bool {
        self.symbol.as_deref().is_none_or(|s| s == symbol)
    }

    fn trip(&mut self, books: &mut Books, symbol: &str, now_ms: i64, reason: TripReason) {
        if self.cfg.cooldown_ms > 0 {
            let until = self.blocked_until_ms.entry(symbol.to_string()).or_insert(0);
            *until = (*until).max(now_ms + self.cfg.cooldown_ms);
        }
        if self.cfg.warmup_depth_updates > 0 {
            let warmup = self.warmup_remaining.entry(symbol.to_string()).or_insert(0);
            *warmup = (*warmup).max(self.cfg.warmup_depth_updates);
        }

        let reset = match reason {
            TripReason::Mismatch => self.cfg.reset_on_mismatch,
            TripReason::Crossed => self.cfg.reset_on_crossed,
            TripReason::MissingSide => self.cfg.reset_on_missing_side,
            TripReason::Spread => self.cfg.reset_on_spread,
            TripReason::Stale => self.cfg.reset_on_stale,
        };

        warn!(symbol, now_ms, reason = reason.as_str(), reset, "book guard tripped");

        if reset {
            books.book(symbol).clear();
            self.inner.cancel_symbol_orders(symbol, true, true);
            self.stats.resets += 1;
        }
    }

    pub fn on_depth_update(&mut self, update: &DepthUpdate, books: &mut Books) {
        if self.cfg.enabled && self.symbol_applies(&update.symbol) {
            let sym = update.symbol.as_str();
            self.last_depth_event_ms.insert(sym.to_string(), update.event_time_ms);

            if let Some(warmup) = self.warmup_remaining.get_mut(sym) {
                if *warmup > 0 {
                    *warmup -= 1;
                }
            }

            if let Some(&last_final) = self.last_final_update_id.get(sym) {
                if update.prev_final_update_id != last_final {
                    self.stats.mismatch_trips += 1;
                    let sym_owned = sym.to_string();
                    self.trip(books, &sym_owned, update.event_time_ms, TripReason::Mismatch);
                }
            }
            self.last_final_update_id.insert(sym.to_string(), update.final_update_id);
        }

        self.inner.on_depth_update(update, books);

        // Crossed books are detected on depth updates too, not only on
        // submit.
        if self.cfg.enabled && self.symbol_applies(&update.symbol) {
            let book = books.book(&update.symbol);
            if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
                if bid >= ask {
                    self.stats.cross_trips += 1;
                    let sym = update.symbol.clone();
                    self.trip(books, &sym, update.event_time_ms, TripReason::Crossed);
                }
            }
        }
    }

    pub fn submit(&mut self, order: Order, books: &mut Books, now_ms: i64) -> SimResult<()> {
        if !self.cfg.enabled || !self.symbol_applies(&order.symbol) {
            return self.inner.submit(order, books, now_ms);
        }

        let sym = order.symbol.clone();

        let blocked_until = self.blocked_until_ms.get(&sym).copied().unwrap_or(0);
        if now_ms < blocked_until {
            self.stats.blocked_submits += 1;
            self.stats.blocked_cooldown += 1;
            return Ok(());
        }

        if self.warmup_remaining.get(&sym).copied().unwrap_or(0) > 0 {
            self.stats.blocked_submits += 1;
            self.stats.blocked_warmup += 1;
            return Ok(());
        }

        if self.cfg.max_staleness_ms > 0 {
            let fresh = self
                .last_depth_event_ms
                .get(&sym)
                .is_some_and(|&t| now_ms - t <= self.cfg.max_staleness_ms);
            if !fresh {
                self.stats.blocked_submits += 1;
                self.stats.blocked_stale += 1;
                self.stats.stale_trips += 1;
                self.trip(books, &sym, now_ms, TripReason::Stale);
                return Ok(());
            }
        }

        let (bid, ask) = {
            let book = books.book(&sym);
            (book.best_bid(), book.best_ask())
        };
        let (bid, ask) = match (bid, ask) {
            (Some(b), Some(a)) => (b, a),
            _ => {
                self.stats.blocked_submits += 1;
                self.stats.blocked_missing_side += 1;
                self.stats.missing_side_trips += 1;
                self.trip(books, &sym, now_ms, TripReason::MissingSide);
                return Ok(());
            }
        };

        if bid >= ask {
            self.stats.blocked_submits += 1;
            self.stats.blocked_crossed += 1;
            self.stats.cross_trips += 1;
            self.trip(books, &sym, now_ms, TripReason::Crossed);
            return Ok(());
        }

        let spread = ask - bid;
        if self.cfg.max_spread.is_some_and(|m| spread > m) {
            self.stats.blocked_submits += 1;
            self.stats.blocked_spread += 1;
            self.stats.spread_trips += 1;
            self.trip(books, &sym, now_ms, TripReason::Spread);
            return Ok(());
        }

        if let Some(max_bps) = self.cfg.max_spread_bps {
            let mid = (ask + bid) / 2.0;
            if mid > 0.0 && (spread / mid) * 10_000.0 > max_bps {
                self.stats.blocked_submits += 1;
                self.stats.blocked_spread += 1;
                self.stats.spread_trips += 1;
                self.trip(books, &sym, now_ms, TripReason::Spread);
                return Ok(());
            }
        }

        self.inner.submit(order, books, now_ms)
    }

    // Pass-throughs.

    pub fn on_time(&mut self, now_ms: i64, books: &mut Books) -> SimResult<()> {
        self.inner.on_time(now_ms, books)
    }

    pub fn on_trade(&mut self, trade: &Trade, now_ms: i64) {
        self.inner.on_trade(trade, now_ms);
    }

    pub fn cancel(&mut self, order_id: &str, now_ms: Option<i64>) {
        self.inner.cancel(order_id, now_ms);
    }

    pub fn has_open_orders(&self) -> bool {
        self.inner.has_open_orders()
    }
}
