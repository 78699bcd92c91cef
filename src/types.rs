use serde::Serialize;

// ─── Price keys ─────────────────────────────────────────────────────────────

/// Normalize a float price into a deterministic integer key for level
/// indexing. Floats are kept for arithmetic; keys are used wherever price
/// identity matters (level maps, heaps, maker buckets).
#[inline]
pub fn price_key(price: f64) -> i64 {
    (price * 1_000_000_000.0).round() as i64
}

// ─── Sides ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[inline]
    pub fn is_buy(self) -> bool {
        matches!(self, Side::Buy)
    }

    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// ─── Market-data events ─────────────────────────────────────────────────────
//
// Every event carries `event_time_ms` (logical time on the replay timeline)
// and `received_time_ns` (capture wall-clock, used for tie-breaks and lag
// measurement).

/// One depth increment: all level changes sharing a `final_update_id`.
/// A quantity of zero removes the level.
#[derive(Clone, Debug)]
pub struct DepthUpdate {
    pub received_time_ns: i64,
    pub event_time_ms: i64,
    pub transaction_time_ms: i64,
    pub symbol: String,
    pub first_update_id: i64,
    pub final_update_id: i64,
    pub prev_final_update_id: i64,
    pub bid_updates: Vec<(f64, f64)>,
    pub ask_updates: Vec<(f64, f64)>,
}

/// `is_buyer_maker == true` means the aggressor sold (the trade hit bids).
#[derive(Clone, Debug)]
pub struct Trade {
    pub received_time_ns: i64,
    pub event_time_ms: i64,
    pub trade_time_ms: i64,
    pub symbol: String,
    pub trade_id: i64,
    pub price: f64,
    pub quantity: f64,
    pub is_buyer_maker: bool,
}

#[derive(Clone, Debug)]
pub struct MarkPrice {
    pub received_time_ns: i64,
    pub event_time_ms: i64,
    pub symbol: String,
    pub mark_price: f64,
    pub index_price: f64,
    pub funding_rate: f64,
    pub next_funding_time_ms: i64,
}

/// 24h rolling ticker snapshot.
#[derive(Clone, Debug)]
pub struct Ticker {
    pub received_time_ns: i64,
    pub event_time_ms: i64,
    pub symbol: String,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub weighted_average_price: f64,
    pub last_price: f64,
    pub last_quantity: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub base_asset_volume: f64,
    pub quote_asset_volume: f64,
    pub statistics_open_time_ms: i64,
    pub statistics_close_time_ms: i64,
    pub first_trade_id: i64,
    pub last_trade_id: i64,
    pub total_trades: i64,
}

#[derive(Clone, Debug)]
pub struct OpenInterest {
    pub received_time_ns: i64,
    pub event_time_ms: i64,
    pub timestamp_ms: i64,
    pub symbol: String,
    pub sum_open_interest: f64,
    pub sum_open_interest_value: f64,
}

#[derive(Clone, Debug)]
pub struct Liquidation {
    pub received_time_ns: i64,
    pub event_time_ms: i64,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub time_in_force: String,
    pub quantity: f64,
    pub price: f64,
    pub average_price: f64,
    pub order_status: String,
    pub last_filled_quantity: f64,
    pub filled_quantity: f64,
    pub trade_time_ms: i64,
}

// ─── Replay event ───────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum Event {
    Depth(DepthUpdate),
    Trade(Trade),
    Mark(MarkPrice),
    Ticker(Ticker),
    OpenInterest(OpenInterest),
    Liquidation(Liquidation),
}

impl Event {
    #[inline]
    pub fn event_time_ms(&self) -> i64 {
        match self {
            Event::Depth(e) => e.event_time_ms,
            Event::Trade(e) => e.event_time_ms,
            Event::Mark(e) => e.event_time_ms,
            Event::Ticker(e) => e.event_time_ms,
            Event::OpenInterest(e) => e.event_time_ms,
            Event::Liquidation(e) => e.event_time_ms,
        }
    }

    #[inline]
    pub fn set_event_time_ms(&mut self, t: i64) {
        match self {
            Event::Depth(e) => e.event_time_ms = t,
            Event::Trade(e) => e.event_time_ms = t,
            Event::Mark(e) => e.event_time_ms = t,
            Event::Ticker(e) => e.event_time_ms = t,
            Event::OpenInterest(e) => e.event_time_ms = t,
            Event::Liquidation(e) => e.event_time_ms = t,
        }
    }

    #[inline]
    pub fn received_time_ns(&self) -> i64 {
        match self {
            Event::Depth(e) => e.received_time_ns,
            Event::Trade(e) => e.received_time_ns,
            Event::Mark(e) => e.received_time_ns,
            Event::Ticker(e) => e.received_time_ns,
            Event::OpenInterest(e) => e.received_time_ns,
            Event::Liquidation(e) => e.received_time_ns,
        }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        match self {
            Event::Depth(e) => &e.symbol,
            Event::Trade(e) => &e.symbol,
            Event::Mark(e) => &e.symbol,
            Event::Ticker(e) => &e.symbol,
            Event::OpenInterest(e) => &e.symbol,
            Event::Liquidation(e) => &e.symbol,
        }
    }

    /// Deterministic per-event id used as a merge tie-break: the first
    /// available of transaction time, trade time, capture timestamp or
    /// funding timestamp. `None` sorts after any present id.
    #[inline]
    pub fn tie_break_id(&self) -> Option<i64> {
        match self {
            Event::Depth(e) => Some(e.transaction_time_ms),
            Event::Trade(e) => Some(e.trade_time_ms),
            Event::Mark(e) => Some(e.next_funding_time_ms),
            Event::Ticker(_) => None,
            Event::OpenInterest(e) => Some(e.timestamp_ms),
            Event::Liquidation(e) => Some(e.trade_time_ms),
        }
    }
}
