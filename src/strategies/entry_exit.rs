use crate::analytics::TradeDirection;
use crate::engine::{EngineContext, Strategy};
use crate::error::SimResult;
use crate::execution::Order;
use crate::types::{Event, Side};

/// Scheduled entry/exit cycles: enter a fixed-size position at each
/// `enter_ms`, flatten at the matching `exit_ms`. Used to sanity-check PnL
/// plumbing end to end.
///
/// The equity curve (realized + mark-to-market) is sampled on every mark
/// price for the strategy's symbol.
pub struct EntryExitStrategy {
    pub symbol: String,
    pub direction: TradeDirection,
    pub target_qty: f64,
    pub schedule_ms: Vec<(i64, i64)>,
    pub force_close_on_end: bool,
    pub equity_curve: Vec<(i64, f64)>,

    cycle: usize,
    in_position: bool,
}

impl EntryExitStrategy {
    pub fn new(
        symbol: impl Into<String>,
        direction: TradeDirection,
        target_qty: f64,
        schedule_ms: Vec<(i64, i64)>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            target_qty,
            schedule_ms,
            force_close_on_end: true,
            equity_curve: Vec::new(),
            cycle: 0,
            in_position: false,
        }
    }

    fn pos_qty(&self, ctx: &EngineContext) -> f64 {
        ctx.portfolio().position_qty(&self.symbol)
    }

    fn submit_entry(&mut self, ctx: &mut EngineContext) -> SimResult<()> {
        let side = match self.direction {
            TradeDirection::Long => Side::Buy,
            TradeDirection::Short => Side::Sell,
        };
        ctx.submit(Order::market(
            format!("entry_{}", self.cycle),
            self.symbol.clone(),
            side,
            self.target_qty,
        ))?;
        // Market fills are immediate when there is depth.
        self.in_position = self.pos_qty(ctx) != 0.0;
        Ok(())
    }

    fn submit_exit(&mut self, ctx: &mut EngineContext) -> SimResult<()> {
        let q = self.pos_qty(ctx);
        if q.abs() <= 0.0 {
            self.in_position = false;
            return Ok(());
        }
        let side = if q > 0.0 { Side::Sell } else { Side::Buy };
        ctx.submit(Order::market(
            format!("exit_{}", self.cycle),
            self.symbol.clone(),
            side,
            q.abs(),
        ))?;
        self.in_position = self.pos_qty(ctx) != 0.0;
        Ok(())
    }
}

impl Strategy for EntryExitStrategy {
    fn on_event(&mut self, event: &Event, ctx: &mut EngineContext) -> SimResult<()> {
        if let Event::Mark(mp) = event {
            if mp.symbol == self.symbol {
                let pf = ctx.portfolio();
                let eq = pf.realized_pnl_usdt + pf.unrealized_pnl(&self.symbol, mp.mark_price);
                self.equity_curve.push((mp.event_time_ms, eq));
            }
            return Ok(());
        }

        let Event::Depth(update) = event else { return Ok(()) };
        if update.symbol != self.symbol || self.cycle >= self.schedule_ms.len() {
            return Ok(());
        }

        // Wait until the book is formed.
        let ready = {
            let book = ctx.book(&self.symbol);
            book.best_bid().is_some() && book.best_ask().is_some()
        };
        if !ready {
            return Ok(());
        }

        let (enter_ms, exit_ms) = self.schedule_ms[self.cycle];
        let now = ctx.now_ms;

        if !self.in_position && now >= enter_ms {
            return self.submit_entry(ctx);
        }

        if self.in_position && now >= exit_ms {
            self.submit_exit(ctx)?;
            if !self.in_position {
                self.cycle += 1;
            }
        }
        Ok(())
    }

    fn on_end(&mut self, ctx: &mut EngineContext) -> SimResult<()> {
        if !self.force_close_on_end || self.pos_qty(ctx).abs() <= 0.0 {
            return Ok(());
        }
        self.submit_exit(ctx)
    }
}
