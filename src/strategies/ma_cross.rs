use crate::engine::{EngineContext, Strategy};
use crate::error::{SimError, SimResult};
use crate::execution::Order;
use crate::math::bars::{Bar, BarBuilder};
use crate::types::{Event, Side};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaRule {
    /// Trade only when the close crosses the moving average.
    Cross,
    /// Always target the side of the close relative to the average.
    State,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaMode {
    LongShort,
    LongOnly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaPriceSource {
    Mark,
    Trade,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Long,
    Short,
    Flat,
}

/// Moving-average cross strategy over timeframe bars built from mark or
/// trade prices. Positions are adjusted to target via market orders.
pub struct MaCrossStrategy {
    pub symbol: String,
    pub qty: f64,
    pub tf_ms: i64,
    pub ma_len: usize,
    pub rule: MaRule,
    pub mode: MaMode,
    pub price_source: MaPriceSource,
    pub fill_missing_bars: bool,
    pub eps_qty: f64,

    pub bars: Vec<Bar>,
    pub closes: Vec<f64>,
    pub equity_curve: Vec<(i64, f64)>,

    prev_diff: Option<f64>,
    bar_builder: Option<BarBuilder>,
}

impl MaCrossStrategy {
    pub fn new(symbol: impl Into<String>, qty: f64) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            tf_ms: 300_000,
            ma_len: 9,
            rule: MaRule::Cross,
            mode: MaMode::LongShort,
            price_source: MaPriceSource::Mark,
            fill_missing_bars: false,
            eps_qty: 1e-12,
            bars: Vec::new(),
            closes: Vec::new(),
            equity_curve: Vec::new(),
            prev_diff: None,
            bar_builder: None,
        }
    }

    fn book_ready(&self, ctx: &mut EngineContext) -> bool {
        let book = ctx.book(&self.symbol);
        book.best_bid().is_some() && book.best_ask().is_some()
    }

    fn set_target(&mut self, ctx: &mut EngineContext, target_qty: f64, reason: &str) -> SimResult<()> {
        if !self.book_ready(ctx) {
            return Ok(());
        }
        let cur = ctx.portfolio().position_qty(&self.symbol);
        let delta = target_qty - cur;
        if delta.abs() <= self.eps_qty {
            return Ok(());
        }
        let side = if delta > 0.0 { Side::Buy } else { Side::Sell };
        ctx.submit(Order::market(
            format!("ma_{}_{}", reason, ctx.now_ms),
            self.symbol.clone(),
            side,
            delta.abs(),
        ))
    }

    fn on_closed_bar(&mut self, bar: Bar, ctx: &mut EngineContext) -> SimResult<()> {
        self.bars.push(bar);
        self.closes.push(bar.close);

        if self.closes.len() < self.ma_len {
            return Ok(());
        }

        let window = &self.closes[self.closes.len() - self.ma_len..];
        let ma = window.iter().sum::<f64>() / window.len() as f64;
        let diff = bar.close - ma;

        let desired = match self.rule {
            MaRule::State => Some(if diff >= 0.0 { Target::Long } else { Target::Short }),
            MaRule::Cross => match self.prev_diff {
                Some(prev) if prev <= 0.0 && diff > 0.0 => Some(Target::Long),
                Some(prev) if prev >= 0.0 && diff < 0.0 => Some(Target::Short),
                Some(_) => None,
                // First eligible bar: pick a side from completed history
                // only.
                None if diff > 0.0 => Some(Target::Long),
                None if diff < 0.0 => Some(Target::Short),
                None => None,
            },
        };
        self.prev_diff = Some(diff);

        let Some(mut desired) = desired else { return Ok(()) };
        if self.mode == MaMode::LongOnly && desired == Target::Short {
            desired = Target::Flat;
        }

        match desired {
            Target::Long => self.set_target(ctx, self.qty, "long"),
            Target::Short => self.set_target(ctx, -self.qty, "short"),
            Target::Flat => self.set_target(ctx, 0.0, "flat"),
        }
    }
}

impl Strategy for MaCrossStrategy {
    fn on_start(&mut self, _ctx: &mut EngineContext) -> SimResult<()> {
        if self.qty <= 0.0 {
            return Err(SimError::Config("qty must be > 0".into()));
        }
        if self.ma_len == 0 {
            return Err(SimError::Config("ma_len must be > 0".into()));
        }
        if self.tf_ms <= 0 {
            return Err(SimError::Config("tf_ms must be > 0".into()));
        }
        self.bar_builder = Some(BarBuilder::new(self.tf_ms, self.fill_missing_bars));
        Ok(())
    }

    fn on_event(&mut self, event: &Event, ctx: &mut EngineContext) -> SimResult<()> {
        if let Event::Mark(mp) = event {
            if mp.symbol == self.symbol {
                let pf = ctx.portfolio();
                let eq = pf.realized_pnl_usdt + pf.unrealized_pnl(&self.symbol, mp.mark_price);
                self.equity_curve.push((mp.event_time_ms, eq));
            }
        }

        let (t_ms, price) = match (self.price_source, event) {
            (MaPriceSource::Mark, Event::Mark(mp)) if mp.symbol == self.symbol => {
                (mp.event_time_ms, mp.mark_price)
            }
            (MaPriceSource::Trade, Event::Trade(tr)) if tr.symbol == self.symbol => {
                (tr.event_time_ms, tr.price)
            }
            _ => return Ok(()),
        };

        let closed = match self.bar_builder.as_mut() {
            Some(bb) => bb.on_price(t_ms, price),
            None => return Ok(()),
        };
        for bar in closed {
            self.on_closed_bar(bar, ctx)?;
        }
        Ok(())
    }

    fn on_end(&mut self, ctx: &mut EngineContext) -> SimResult<()> {
        // Go flat at the end regardless of rule.
        self.set_target(ctx, 0.0, "end")
    }
}
