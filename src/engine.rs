//! Backtest driver: replays a merged event stream through the broker chain,
//! ticking strategies on a grid aligned to event time.
//!
//! The engine owns the only mutable reference to books, broker and
//! portfolio. Every event runs to completion before the next is pulled;
//! same-timestamp events are processed in merged order and never reordered.

use std::collections::HashMap;

use tracing::debug;

use crate::book::{Books, L2Book};
use crate::book_guard::{BookGuardConfig, BookGuardStats, BookGuardedBroker};
use crate::broker::{Fill, SimBroker};
use crate::error::{SimError, SimResult};
use crate::execution::Order;
use crate::portfolio::Portfolio;
use crate::types::{Event, Liquidation, MarkPrice, OpenInterest, Side, Ticker};

// ─── Config ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradingWindowMode {
    /// Outside the window, only position-reducing orders pass.
    EntryOnly,
    /// Outside the window, everything is blocked.
    BlockAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerTimeMode {
    /// Advance broker time before applying the event to the book.
    BeforeEvent,
    /// Advance broker time after the event has been applied (default).
    AfterEvent,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub tick_interval_ms: i64,
    pub trading_start_ms: Option<i64>,
    pub trading_end_ms: Option<i64>,
    pub strict_event_time_monotonic: bool,
    pub trading_window_mode: TradingWindowMode,
    pub allow_reducing_outside_trading_window: bool,
    pub broker_time_mode: BrokerTimeMode,
    pub book_guard: Option<BookGuardConfig>,
    pub book_guard_symbol: Option<String>,
    pub emit_final_tick: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            trading_start_ms: None,
            trading_end_ms: None,
            strict_event_time_monotonic: false,
            trading_window_mode: TradingWindowMode::EntryOnly,
            allow_reducing_outside_trading_window: true,
            broker_time_mode: BrokerTimeMode::AfterEvent,
            book_guard: None,
            book_guard_symbol: None,
            emit_final_tick: true,
        }
    }
}

// ─── Broker chain ───────────────────────────────────────────────────────────

/// Core broker, optionally wrapped by the book guard. The trading-window
/// gate is the third layer and lives in [`EngineContext::submit`], which is
/// the only entry point strategies see.
#[derive(Debug)]
enum BrokerChain {
    Plain(SimBroker),
    Guarded(BookGuardedBroker),
}

impl BrokerChain {
    fn submit(&mut self, order: Order, books: &mut Books, now_ms: i64) -> SimResult<()> {
        match self {
            BrokerChain::Plain(b) => b.submit(order, books, now_ms),
            BrokerChain::Guarded(g) => g.submit(order, books, now_ms),
        }
    }

    fn cancel(&mut self, order_id: &str, now_ms: Option<i64>) {
        match self {
            BrokerChain::Plain(b) => b.cancel(order_id, now_ms),
            BrokerChain::Guarded(g) => g.cancel(order_id, now_ms),
        }
    }

    fn on_time(&mut self, now_ms: i64, books: &mut Books) -> SimResult<()> {
        match self {
            BrokerChain::Plain(b) => b.on_time(now_ms, books),
            BrokerChain::Guarded(g) => g.on_time(now_ms, books),
        }
    }

    fn on_depth_update(&mut self, update: &crate::types::DepthUpdate, books: &mut Books) {
        match self {
            BrokerChain::Plain(b) => b.on_depth_update(update, books),
            BrokerChain::Guarded(g) => g.on_depth_update(update, books),
        }
    }

    fn on_trade(&mut self, trade: &crate::types::Trade, now_ms: i64) {
        match self {
            BrokerChain::Plain(b) => b.on_trade(trade, now_ms),
            BrokerChain::Guarded(g) => g.on_trade(trade, now_ms),
        }
    }

    fn sim(&self) -> &SimBroker {
        match self {
            BrokerChain::Plain(b) => b,
            BrokerChain::Guarded(g) => &g.inner,
        }
    }

    fn sim_mut(&mut self) -> &mut SimBroker {
        match self {
            BrokerChain::Plain(b) => b,
            BrokerChain::Guarded(g) => &mut g.inner,
        }
    }

    fn guard_stats(&self) -> Option<&BookGuardStats> {
        match self {
            BrokerChain::Plain(_) => None,
            BrokerChain::Guarded(g) => Some(&g.stats),
        }
    }
}

// ─── Context ────────────────────────────────────────────────────────────────

/// Everything a strategy can see and touch during a run.
#[derive(Debug)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub now_ms: i64,
    pub books: Books,

    /// Latest ancillary snapshot per symbol.
    pub mark: HashMap<String, MarkPrice>,
    pub ticker: HashMap<String, Ticker>,
    pub open_interest: HashMap<String, OpenInterest>,
    pub liquidation: HashMap<String, Liquidation>,

    broker: BrokerChain,
    last_funding_applied_ms: HashMap<String, i64>,
}

impl EngineContext {
    fn new(config: EngineConfig, broker: SimBroker) -> Self {
        let chain = match (&config.book_guard, &config.book_guard_symbol) {
            (Some(guard_cfg), symbol) if guard_cfg.enabled => BrokerChain::Guarded(
                BookGuardedBroker::new(broker, symbol.clone(), guard_cfg.clone()),
            ),
            _ => BrokerChain::Plain(broker),
        };
        Self {
            config,
            now_ms: 0,
            books: Books::new(),
            mark: HashMap::new(),
            ticker: HashMap::new(),
            open_interest: HashMap::new(),
            liquidation: HashMap::new(),
            broker: chain,
            last_funding_applied_ms: HashMap::new(),
        }
    }

    pub fn book(&mut self, symbol: &str) -> &mut L2Book {
        self.books.book(symbol)
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.broker.sim().portfolio
    }

    pub fn fills(&self) -> &[Fill] {
        &self.broker.sim().fills
    }

    pub fn guard_stats(&self) -> Option<&BookGuardStats> {
        self.broker.guard_stats()
    }

    pub fn has_open_orders(&self) -> bool {
        self.broker.sim().has_open_orders()
    }

    pub fn is_trading_time(&self) -> bool {
        if self.config.trading_start_ms.is_some_and(|s| self.now_ms < s) {
            return false;
        }
        if self.config.trading_end_ms.is_some_and(|e| self.now_ms > e) {
            return false;
        }
        true
    }

    /// Submit through the trading-window gate into the broker chain.
    ///
    /// Reduce-only orders that would not reduce are dropped. Outside the
    /// window, `EntryOnly` mode still lets reducing orders through (unless
    /// reducing is disallowed too); `BlockAll` drops everything.
    pub fn submit(&mut self, order: Order) -> SimResult<()> {
        if order.reduce_only && !self.is_reducing_order(&order) {
            return Ok(());
        }
        if self.is_trading_time() {
            return self.broker.submit(order, &mut self.books, self.now_ms);
        }

        let mut mode = self.config.trading_window_mode;
        if mode == TradingWindowMode::EntryOnly && !self.config.allow_reducing_outside_trading_window
        {
            mode = TradingWindowMode::BlockAll;
        }
        if mode == TradingWindowMode::EntryOnly && self.is_reducing_order(&order) {
            return self.broker.submit(order, &mut self.books, self.now_ms);
        }
        Ok(())
    }

    pub fn cancel(&mut self, order_id: &str) {
        self.broker.cancel(order_id, Some(self.now_ms));
    }

    pub fn cancel_symbol_orders(&mut self, symbol: &str) {
        self.broker.sim_mut().cancel_symbol_orders(symbol, true, true);
    }

    /// An order reduces iff the current position is non-zero, the order
    /// opposes its sign, and its quantity does not exceed the position.
    fn is_reducing_order(&self, order: &Order) -> bool {
        let pos_qty = self.portfolio().position_qty(&order.symbol);
        if pos_qty == 0.0 || order.quantity <= 0.0 {
            return false;
        }
        let opposes = (pos_qty > 0.0 && order.side == Side::Sell)
            || (pos_qty < 0.0 && order.side == Side::Buy);
        opposes && order.quantity <= pos_qty.abs() + 1e-12
    }

    /// Apply funding on the first mark at/after each funding timestamp, at
    /// most once per funding timestamp per symbol. Returns the funding PnL
    /// applied.
    pub fn apply_funding_if_due(&mut self, mp: &MarkPrice) -> f64 {
        if mp.next_funding_time_ms <= 0 || mp.event_time_ms < mp.next_funding_time_ms {
            return 0.0;
        }
        let last = self.last_funding_applied_ms.get(&mp.symbol).copied().unwrap_or(-1);
        if mp.next_funding_time_ms <= last {
            return 0.0;
        }
        self.last_funding_applied_ms.insert(mp.symbol.clone(), mp.next_funding_time_ms);
        self.broker
            .sim_mut()
            .portfolio
            .apply_funding(&mp.symbol, mp.mark_price, mp.funding_rate)
    }

    fn on_time(&mut self, now_ms: i64) -> SimResult<()> {
        self.broker.on_time(now_ms, &mut self.books)
    }
}

// ─── Strategy contract ──────────────────────────────────────────────────────

/// Strategy callbacks. All hooks default to no-ops so implementations only
/// write the ones they need.
pub trait Strategy {
    fn on_start(&mut self, _ctx: &mut EngineContext) -> SimResult<()> {
        Ok(())
    }

    /// Grid tick, monotonic in `now_ms`.
    fn on_tick(&mut self, _now_ms: i64, _ctx: &mut EngineContext) -> SimResult<()> {
        Ok(())
    }

    /// One call per merged event, after the event has been applied.
    fn on_event(&mut self, _event: &Event, _ctx: &mut EngineContext) -> SimResult<()> {
        Ok(())
    }

    fn on_end(&mut self, _ctx: &mut EngineContext) -> SimResult<()> {
        Ok(())
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BacktestResult {
    pub ctx: EngineContext,
}

pub struct BacktestEngine {
    pub config: EngineConfig,
    broker: SimBroker,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config, broker: SimBroker::default() }
    }

    pub fn with_broker(config: EngineConfig, broker: SimBroker) -> Self {
        Self { config, broker }
    }

    pub fn run<I, S>(self, events: I, strategy: &mut S) -> SimResult<BacktestResult>
    where
        I: IntoIterator<Item = Event>,
        S: Strategy + ?Sized,
    {
        let mut ctx = EngineContext::new(self.config, self.broker);
        strategy.on_start(&mut ctx)?;

        let tick_interval = ctx.config.tick_interval_ms.max(0);
        let broker_time_mode = ctx.config.broker_time_mode;
        let mut next_tick_ms: Option<i64> = None;
        let mut last_event_time_ms: Option<i64> = None;
        let mut n_events: u64 = 0;

        for ev in events {
            let now = ev.event_time_ms();
            if let Some(last) = last_event_time_ms {
                if now < last && ctx.config.strict_event_time_monotonic {
                    return Err(SimError::EventTimeRegression { prev: last, got: now });
                }
            }
            last_event_time_ms = Some(now);
            n_events += 1;

            // Drive grid ticks strictly before the current event time,
            // anchored to the first observed timestamp.
            if tick_interval > 0 {
                let mut tick = next_tick_ms.unwrap_or(now);
                while tick < now {
                    ctx.now_ms = tick;
                    ctx.on_time(tick)?;
                    strategy.on_tick(tick, &mut ctx)?;
                    tick += tick_interval;
                }
                next_tick_ms = Some(tick);
            }

            ctx.now_ms = now;
            if broker_time_mode == BrokerTimeMode::BeforeEvent {
                ctx.on_time(now)?;
            }

            match &ev {
                Event::Depth(update) => {
                    ctx.broker.on_depth_update(update, &mut ctx.books);
                }
                Event::Trade(trade) => {
                    ctx.broker.on_trade(trade, now);
                }
                Event::Mark(mp) => {
                    ctx.mark.insert(mp.symbol.clone(), mp.clone());
                    ctx.apply_funding_if_due(mp);
                }
                Event::Ticker(tk) => {
                    ctx.ticker.insert(tk.symbol.clone(), tk.clone());
                }
                Event::OpenInterest(oi) => {
                    ctx.open_interest.insert(oi.symbol.clone(), oi.clone());
                }
                Event::Liquidation(liq) => {
                    ctx.liquidation.insert(liq.symbol.clone(), liq.clone());
                }
            }

            if broker_time_mode == BrokerTimeMode::AfterEvent {
                ctx.on_time(now)?;
            }

            // A tick landing exactly on this event runs after the event has
            // been applied, without advancing broker time twice.
            if tick_interval > 0 && next_tick_ms == Some(now) {
                ctx.now_ms = now;
                strategy.on_tick(now, &mut ctx)?;
                next_tick_ms = Some(now + tick_interval);
            }

            strategy.on_event(&ev, &mut ctx)?;
        }

        // One last tick so strategies can clean up on grid boundaries.
        if let Some(tick) = next_tick_ms {
            if ctx.config.emit_final_tick {
                ctx.now_ms = tick;
                ctx.on_time(tick)?;
                strategy.on_tick(tick, &mut ctx)?;
            }
        }

        strategy.on_end(&mut ctx)?;
        debug!(n_events, fills = ctx.fills().len(), "backtest run complete");
        Ok(BacktestResult { ctx })
    }
}
