/// One OHLC bar on a fixed timeframe grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bar {
    pub start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Timeframe bar builder fed by incoming prices.
///
/// A bar is considered closed when the first tick of a later bar arrives.
/// With `fill_missing`, empty bars between two observed bars are emitted as
/// flat bars repeating the last close.
#[derive(Clone, Debug)]
pub struct BarBuilder {
    tf_ms: i64,
    fill_missing: bool,
    bar_id: Option<i64>,
    bar: Option<Bar>,
}

impl BarBuilder {
    pub fn new(tf_ms: i64, fill_missing: bool) -> Self {
        assert!(tf_ms > 0, "tf_ms must be > 0");
        Self {
            tf_ms,
            fill_missing,
            bar_id: None,
            bar: None,
        }
    }

    /// Feed one price observation; returns the bars closed by it.
    pub fn on_price(&mut self, t_ms: i64, price: f64) -> Vec<Bar> {
        let bid = t_ms.div_euclid(self.tf_ms);
        let mut closed = Vec::new();

        let (cur_id, cur) = match (self.bar_id, self.bar.as_mut()) {
            (Some(id), Some(bar)) => (id, bar),
            _ => {
                self.bar_id = Some(bid);
                self.bar = Some(Bar {
                    start_ms: bid * self.tf_ms,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                });
                return closed;
            }
        };

        if bid == cur_id {
            cur.high = cur.high.max(price);
            cur.low = cur.low.min(price);
            cur.close = price;
            return closed;
        }

        closed.push(*cur);

        if self.fill_missing && bid > cur_id + 1 {
            let last_close = cur.close;
            for mid in (cur_id + 1)..bid {
                closed.push(Bar {
                    start_ms: mid * self.tf_ms,
                    open: last_close,
                    high: last_close,
                    low: last_close,
                    close: last_close,
                });
            }
        }

        self.bar_id = Some(bid);
        self.bar = Some(Bar {
            start_ms: bid * self.tf_ms,
            open: price,
            high: price,
            low: price,
            close: price,
        });
        closed
    }
}
