use thiserror::Error;

/// Errors surfaced by the replay/simulation layers.
///
/// Guard rejections, window blocks and post-only crossings are expected
/// control flow and never produce an error; they only increment counters.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid knob detected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An in-memory materialization would exceed the configured row limit.
    #[error("{context}: materializing stream requires more than {limit} rows")]
    RowLimit { context: &'static str, limit: usize },

    /// Malformed market data or order payload.
    #[error("malformed data: {0}")]
    Data(String),

    /// Event time regressed while `strict_event_time_monotonic` was set.
    #[error("event_time_ms must be non-decreasing, got {got} after {prev}")]
    EventTimeRegression { prev: i64, got: i64 },

    /// A per-day source file does not exist.
    #[error("missing source data: {0}")]
    MissingSource(String),
}

pub type SimResult<T> = Result<T, SimError>;
