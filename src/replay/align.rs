//! Availability-time alignment.
//!
//! Capture lag (`received_time_ns/1e6 − event_time_ms`, clamped at zero)
//! measures how late each datum actually arrived. Alignment shifts an
//! event's logical time forward to when it would have been observable to a
//! live consumer, so slow streams cannot leak into the past of fast ones.

use std::collections::VecDeque;

use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::math::quantile::quantile_interpolated;
use crate::replay::EventStream;
use crate::types::Event;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlignmentMode {
    /// Pass events through untouched.
    #[default]
    None,
    /// Constant delay: the configured base (raised by an optional
    /// externally calibrated floor), clamped to `[min, max]`.
    FixedDelay,
    /// Rolling causal delay: `max(base, quantile(lags before this event))`
    /// over a sliding history window. The first event uses the base alone.
    CausalAsof,
    /// One quantile over the whole stream's lags, applied to every event.
    /// Not strictly causal (future lags influence past delays); kept for
    /// calibration studies. Prefer `CausalAsof` for honest replays.
    CausalAsofGlobal,
}

#[derive(Clone, Debug)]
pub struct AlignmentConfig {
    pub mode: AlignmentMode,
    /// Lag quantile in [0, 1] used by the causal modes.
    pub quantile: f64,
    pub min_delay_ms: i64,
    pub max_delay_ms: Option<i64>,
    /// Sliding-window size for `CausalAsof`.
    pub history_size: usize,
    /// Materialization cap for `CausalAsofGlobal`; None or 0 disables it.
    pub global_row_limit: Option<usize>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            mode: AlignmentMode::None,
            quantile: 0.8,
            min_delay_ms: 0,
            max_delay_ms: None,
            history_size: 1024,
            global_row_limit: Some(2_000_000),
        }
    }
}

impl AlignmentConfig {
    fn validate(&self) -> SimResult<()> {
        if self.min_delay_ms < 0 {
            return Err(SimError::Config("min_delay_ms must be >= 0".into()));
        }
        if let Some(max) = self.max_delay_ms {
            if max < 0 {
                return Err(SimError::Config("max_delay_ms must be >= 0 when provided".into()));
            }
            if max < self.min_delay_ms {
                return Err(SimError::Config("max_delay_ms must be >= min_delay_ms".into()));
            }
        }
        match self.mode {
            AlignmentMode::CausalAsof | AlignmentMode::CausalAsofGlobal => {
                if !(0.0..=1.0).contains(&self.quantile) {
                    return Err(SimError::Config("quantile must be in [0, 1]".into()));
                }
                if self.mode == AlignmentMode::CausalAsof && self.history_size < 1 {
                    return Err(SimError::Config("history_size must be >= 1 for causal_asof".into()));
                }
            }
            AlignmentMode::None | AlignmentMode::FixedDelay => {}
        }
        Ok(())
    }

    fn clamp_delay(&self, delay_ms: i64) -> i64 {
        let mut out = delay_ms.max(self.min_delay_ms);
        if let Some(max) = self.max_delay_ms {
            out = out.min(max);
        }
        out
    }
}

#[inline]
fn lag_ms(ev: &Event) -> i64 {
    (ev.received_time_ns() / 1_000_000 - ev.event_time_ms()).max(0)
}

/// Align one stream per the configured mode.
///
/// `base_delay_ms` is the stream's configured fixed delay;
/// `calibrated_delay_ms` is an optional externally measured floor that
/// raises the base before clamping. Validation errors surface at
/// construction; `CausalAsofGlobal` additionally materializes the stream
/// here and fails loudly past the row limit.
pub fn align_stream<'a, I>(
    stream: I,
    cfg: &AlignmentConfig,
    base_delay_ms: i64,
    calibrated_delay_ms: Option<i64>,
) -> SimResult<EventStream<'a>>
where
    I: Iterator<Item = Event> + 'a,
{
    if cfg.mode == AlignmentMode::None {
        return Ok(Box::new(stream));
    }

    cfg.validate()?;
    if base_delay_ms < 0 {
        return Err(SimError::Config("per-stream delay must be >= 0".into()));
    }
    if calibrated_delay_ms.is_some_and(|c| c < 0) {
        return Err(SimError::Config("calibrated delay must be >= 0 when provided".into()));
    }
    let base = cfg.clamp_delay(base_delay_ms.max(calibrated_delay_ms.unwrap_or(0)));

    match cfg.mode {
        AlignmentMode::None => unreachable!("handled above"),
        AlignmentMode::FixedDelay => {
            Ok(Box::new(stream.map(move |mut ev| {
                let t = ev.event_time_ms();
                ev.set_event_time_ms(t + base);
                ev
            })))
        }
        AlignmentMode::CausalAsof => Ok(Box::new(RollingAligned {
            inner: stream,
            cfg: cfg.clone(),
            base,
            lags_sorted: Vec::new(),
            lags_fifo: VecDeque::new(),
            last_out_ms: None,
        })),
        AlignmentMode::CausalAsofGlobal => {
            let events = materialize_with_row_limit(stream, cfg.global_row_limit)?;
            let mut lags: Vec<i64> = events.iter().map(lag_ms).collect();
            lags.sort_unstable();
            let delay = cfg.clamp_delay(base.max(quantile_interpolated(&lags, cfg.quantile)));
            debug!(
                rows = events.len(),
                delay_ms = delay,
                "global-quantile alignment uses future lags; not strictly causal"
            );
            Ok(Box::new(GlobalAligned { events: events.into_iter(), delay, last_out_ms: None }))
        }
    }
}

fn materialize_with_row_limit<I>(stream: I, row_limit: Option<usize>) -> SimResult<Vec<Event>>
where
    I: Iterator<Item = Event>,
{
    let limit = match row_limit {
        Some(l) if l > 0 => l,
        _ => return Ok(stream.collect()),
    };
    let mut out = Vec::new();
    for ev in stream {
        out.push(ev);
        if out.len() > limit {
            return Err(SimError::RowLimit { context: "causal_asof_global", limit });
        }
    }
    Ok(out)
}

/// Monotonicity repair: an output time below the previous output is clamped
/// up to it, so aligned streams stay sorted.
#[inline]
fn clamp_monotonic(out_ms: i64, last_out_ms: &mut Option<i64>) -> i64 {
    let out = match *last_out_ms {
        Some(last) if out_ms < last => last,
        _ => out_ms,
    };
    *last_out_ms = Some(out);
    out
}

struct RollingAligned<I> {
    inner: I,
    cfg: AlignmentConfig,
    base: i64,
    /// Sorted lags for the quantile, kept in lockstep with the FIFO.
    lags_sorted: Vec<i64>,
    lags_fifo: VecDeque<i64>,
    last_out_ms: Option<i64>,
}

impl<I: Iterator<Item = Event>> Iterator for RollingAligned<I> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let mut ev = self.inner.next()?;

        let delay = if self.lags_sorted.is_empty() {
            self.base
        } else {
            let q_delay = quantile_interpolated(&self.lags_sorted, self.cfg.quantile);
            self.cfg.clamp_delay(self.base.max(q_delay))
        };

        // Lag is measured on the original event time, strictly before this
        // event's own lag joins the history.
        let original_ms = ev.event_time_ms();
        let lag = lag_ms(&ev);
        let out_ms = clamp_monotonic(original_ms + delay, &mut self.last_out_ms);
        ev.set_event_time_ms(out_ms);

        let idx = self.lags_sorted.partition_point(|&v| v < lag);
        self.lags_sorted.insert(idx, lag);
        self.lags_fifo.push_back(lag);
        if self.lags_fifo.len() > self.cfg.history_size {
            if let Some(old) = self.lags_fifo.pop_front() {
                let idx = self.lags_sorted.partition_point(|&v| v < old);
                if idx < self.lags_sorted.len() {
                    self.lags_sorted.remove(idx);
                }
            }
        }

        Some(ev)
    }
}

struct GlobalAligned {
    events: std::vec::IntoIter<Event>,
    delay: i64,
    last_out_ms: Option<i64>,
}

impl Iterator for GlobalAligned {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let mut ev = self.events.next()?;
        let out_ms = clamp_monotonic(ev.event_time_ms() + self.delay, &mut self.last_out_ms);
        ev.set_event_time_ms(out_ms);
        Some(ev)
    }
}
