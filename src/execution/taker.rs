use crate::book::{BookSide, L2Book, EPS_QTY};
use crate::error::{SimError, SimResult};
use crate::types::Side;

/// Simulate a taker fill against L2 depth, applying self-impact to `book`.
///
/// Walks best levels on the opposite side, decrementing or draining each
/// consumed level in place. Returns `(avg_price, filled_qty)`; the average
/// is NaN when nothing filled. With `limit_price` the walk stops at the
/// first level beyond the limit (IOC-like).
pub fn consume_taker_fill(
    book: &mut L2Book,
    side: Side,
    quantity: f64,
    limit_price: Option<f64>,
) -> SimResult<(f64, f64)> {
    if quantity <= 0.0 {
        return Err(SimError::Config("taker quantity must be > 0".into()));
    }

    let book_side = BookSide::for_taker(side);
    let crosses = |p: f64| match (limit_price, side) {
        (Some(lp), Side::Buy) => p > lp,
        (Some(lp), Side::Sell) => p < lp,
        (None, _) => false,
    };

    let mut remaining = quantity;
    let mut filled = 0.0;
    let mut cost = 0.0;

    while remaining > 0.0 {
        let price = match side {
            Side::Buy => book.best_ask(),
            Side::Sell => book.best_bid(),
        };
        let Some(price) = price else { break };
        if crosses(price) {
            break;
        }

        let lvl_qty = book.level_qty(book_side, price);
        let take = lvl_qty.min(remaining);
        filled += take;
        cost += take * price;
        remaining -= take;

        let new_qty = lvl_qty - take;
        book.apply_level(book_side, price, if new_qty <= EPS_QTY { 0.0 } else { new_qty });
    }

    if filled <= 0.0 {
        return Ok((f64::NAN, 0.0));
    }
    Ok((cost / filled, filled))
}
