//! Day-stream assembly: per-stream sources → availability alignment →
//! time slice → k-way merge.
//!
//! Concrete file readers live behind [`DayStreamSource`]; each method hands
//! back one day's worth of a single stream, already sorted by
//! `event_time_ms`, or a missing-source error when the day's file does not
//! exist.

use std::ops::Range;

use chrono::NaiveDate;
use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::replay::align::{align_stream, AlignmentConfig};
use crate::replay::{merge_event_streams, slice_event_stream, EventStream, MergedEvents};

/// Per-day, per-stream event producers (the file-format boundary).
pub trait DayStreamSource {
    /// Depth increments for the day, restricted to `hours`. When
    /// `skip_missing` is set, absent per-hour files are skipped instead of
    /// failing the whole day.
    fn depth_updates(
        &self,
        symbol: &str,
        day: NaiveDate,
        hours: Range<u8>,
        skip_missing: bool,
    ) -> SimResult<EventStream<'_>>;

    fn trades(&self, symbol: &str, day: NaiveDate) -> SimResult<EventStream<'_>>;
    fn mark_prices(&self, symbol: &str, day: NaiveDate) -> SimResult<EventStream<'_>>;
    fn tickers(&self, symbol: &str, day: NaiveDate) -> SimResult<EventStream<'_>>;
    fn open_interest(&self, symbol: &str, day: NaiveDate) -> SimResult<EventStream<'_>>;
    fn liquidations(&self, symbol: &str, day: NaiveDate) -> SimResult<EventStream<'_>>;
}

#[derive(Clone, Debug)]
pub struct DayStreamConfig {
    pub include_orderbook: bool,
    pub include_trades: bool,
    pub include_mark_price: bool,
    pub include_ticker: bool,
    pub include_open_interest: bool,
    pub include_liquidations: bool,

    /// Availability-time alignment applied to every stream except the
    /// orderbook (depth defines the book timeline and passes through).
    pub alignment: AlignmentConfig,
    pub trade_delay_ms: i64,
    pub mark_price_delay_ms: i64,
    pub ticker_delay_ms: i64,
    pub open_interest_delay_ms: i64,
    /// Externally measured open-interest delay floor (offline calibration).
    pub open_interest_calibrated_delay_ms: Option<i64>,
    pub liquidation_delay_ms: i64,

    pub orderbook_hours: Range<u8>,
    pub orderbook_skip_missing: bool,
    /// Skip whole streams whose per-day file is absent instead of failing.
    pub skip_missing_daily_files: bool,

    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

impl Default for DayStreamConfig {
    fn default() -> Self {
        Self {
            include_orderbook: true,
            include_trades: true,
            include_mark_price: false,
            include_ticker: false,
            include_open_interest: false,
            include_liquidations: false,
            alignment: AlignmentConfig::default(),
            trade_delay_ms: 0,
            mark_price_delay_ms: 0,
            ticker_delay_ms: 0,
            open_interest_delay_ms: 0,
            open_interest_calibrated_delay_ms: None,
            liquidation_delay_ms: 0,
            orderbook_hours: 0..24,
            orderbook_skip_missing: true,
            skip_missing_daily_files: false,
            start_ms: None,
            end_ms: None,
        }
    }
}

/// Build the merged event stream for one symbol on one day.
///
/// Each underlying stream is aligned and sliced to
/// `[start_ms, end_ms)` before merging, so the merge sees only what the
/// run will consume.
pub fn build_day_stream<'a, S: DayStreamSource>(
    source: &'a S,
    cfg: &DayStreamConfig,
    symbol: &str,
    day: NaiveDate,
) -> SimResult<MergedEvents<'a>> {
    let mut streams: Vec<EventStream<'a>> = Vec::new();

    let fetch = |res: SimResult<EventStream<'a>>, name: &str| -> SimResult<Option<EventStream<'a>>> {
        match res {
            Ok(s) => Ok(Some(s)),
            Err(SimError::MissingSource(path)) if cfg.skip_missing_daily_files => {
                debug!(stream = name, %path, "skipping missing day stream");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    };

    let slice = |s: EventStream<'a>| -> EventStream<'a> {
        if cfg.start_ms.is_some() || cfg.end_ms.is_some() {
            Box::new(slice_event_stream(s, cfg.start_ms, cfg.end_ms))
        } else {
            s
        }
    };

    if cfg.include_orderbook {
        let res = source.depth_updates(
            symbol,
            day,
            cfg.orderbook_hours.clone(),
            cfg.orderbook_skip_missing,
        );
        if let Some(s) = fetch(res, "orderbook")? {
            streams.push(slice(s));
        }
    }

    if cfg.include_trades {
        if let Some(s) = fetch(source.trades(symbol, day), "trades")? {
            let aligned = align_stream(s, &cfg.alignment, cfg.trade_delay_ms, None)?;
            streams.push(slice(aligned));
        }
    }

    if cfg.include_mark_price {
        if let Some(s) = fetch(source.mark_prices(symbol, day), "mark_price")? {
            let aligned = align_stream(s, &cfg.alignment, cfg.mark_price_delay_ms, None)?;
            streams.push(slice(aligned));
        }
    }

    if cfg.include_ticker {
        if let Some(s) = fetch(source.tickers(symbol, day), "ticker")? {
            let aligned = align_stream(s, &cfg.alignment, cfg.ticker_delay_ms, None)?;
            streams.push(slice(aligned));
        }
    }

    if cfg.include_open_interest {
        if let Some(s) = fetch(source.open_interest(symbol, day), "open_interest")? {
            let aligned = align_stream(
                s,
                &cfg.alignment,
                cfg.open_interest_delay_ms,
                cfg.open_interest_calibrated_delay_ms,
            )?;
            streams.push(slice(aligned));
        }
    }

    if cfg.include_liquidations {
        if let Some(s) = fetch(source.liquidations(symbol, day), "liquidations")? {
            let aligned = align_stream(s, &cfg.alignment, cfg.liquidation_delay_ms, None)?;
            streams.push(slice(aligned));
        }
    }

    Ok(merge_event_streams(streams))
}
