//! Post-run analytics: round trips reconstructed from the fill log, and
//! equity-curve statistics.

use std::collections::HashMap;

use serde::Serialize;

use crate::broker::Fill;

const EPS_QTY: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Long => write!(f, "long"),
            TradeDirection::Short => write!(f, "short"),
        }
    }
}

/// One zero-to-zero position segment.
#[derive(Clone, Debug, Serialize)]
pub struct RoundTrip {
    pub symbol: String,
    pub direction: TradeDirection,
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    /// Total quantity closed over the segment.
    pub quantity: f64,
    pub gross_pnl_usdt: f64,
    pub fees_usdt: f64,
    pub net_pnl_usdt: f64,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RoundTripSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub gross_pnl_usdt: f64,
    pub fees_usdt: f64,
    pub net_pnl_usdt: f64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: i64,
}

struct OpenSegment {
    qty: f64,
    avg_price: f64,
    direction: TradeDirection,
    open_time_ms: i64,
    gross: f64,
    fees: f64,
    closed_qty: f64,
}

/// Replay fills through a fresh per-symbol ledger; every transition from
/// non-zero to zero quantity closes a round trip.
///
/// Fees attach to the segment they belong to; a flipping fill splits its
/// fee proportionally between the trip it closes and the position it opens.
/// Funding is deliberately absent here: it lives in portfolio PnL, not in
/// fill-derived trades.
pub fn round_trips_from_fills(fills: &[Fill]) -> Vec<RoundTrip> {
    let mut open: HashMap<String, OpenSegment> = HashMap::new();
    let mut trips: Vec<RoundTrip> = Vec::new();

    for fill in fills {
        let d = if fill.side.is_buy() { fill.quantity } else { -fill.quantity };
        if d == 0.0 {
            continue;
        }

        let Some(mut seg) = open.remove(&fill.symbol) else {
            open.insert(
                fill.symbol.clone(),
                OpenSegment {
                    qty: d,
                    avg_price: fill.price,
                    direction: if d > 0.0 { TradeDirection::Long } else { TradeDirection::Short },
                    open_time_ms: fill.event_time_ms,
                    gross: 0.0,
                    fees: fill.fee_usdt,
                    closed_qty: 0.0,
                },
            );
            continue;
        };

        if (seg.qty > 0.0) == (d > 0.0) {
            // Increasing the open segment.
            let total = seg.qty.abs() + d.abs();
            seg.avg_price = (seg.qty.abs() * seg.avg_price + d.abs() * fill.price) / total;
            seg.qty += d;
            seg.fees += fill.fee_usdt;
            open.insert(fill.symbol.clone(), seg);
            continue;
        }

        let close_amt = d.abs().min(seg.qty.abs());
        seg.gross += seg.qty.signum() * (fill.price - seg.avg_price) * close_amt;
        let fee_share = fill.fee_usdt * (close_amt / d.abs());
        seg.fees += fee_share;
        seg.closed_qty += close_amt;

        if d.abs() < seg.qty.abs() - EPS_QTY {
            // Partial reduce; the segment stays open.
            seg.qty += d;
            open.insert(fill.symbol.clone(), seg);
            continue;
        }

        trips.push(RoundTrip {
            symbol: fill.symbol.clone(),
            direction: seg.direction,
            open_time_ms: seg.open_time_ms,
            close_time_ms: fill.event_time_ms,
            quantity: seg.closed_qty,
            gross_pnl_usdt: seg.gross,
            fees_usdt: seg.fees,
            net_pnl_usdt: seg.gross - seg.fees,
        });

        let remainder = d.abs() - seg.qty.abs();
        if remainder > EPS_QTY {
            // Flip: the excess opens a fresh segment at the fill price.
            open.insert(
                fill.symbol.clone(),
                OpenSegment {
                    qty: d.signum() * remainder,
                    avg_price: fill.price,
                    direction: if d > 0.0 { TradeDirection::Long } else { TradeDirection::Short },
                    open_time_ms: fill.event_time_ms,
                    gross: 0.0,
                    fees: fill.fee_usdt - fee_share,
                    closed_qty: 0.0,
                },
            );
        }
    }

    trips
}

pub fn summarize_round_trips(trips: &[RoundTrip]) -> RoundTripSummary {
    let mut s = RoundTripSummary::default();
    s.trades = trips.len();
    let mut total_duration: i64 = 0;
    for t in trips {
        if t.net_pnl_usdt > 0.0 {
            s.wins += 1;
        } else if t.net_pnl_usdt < 0.0 {
            s.losses += 1;
        }
        s.gross_pnl_usdt += t.gross_pnl_usdt;
        s.fees_usdt += t.fees_usdt;
        s.net_pnl_usdt += t.net_pnl_usdt;
        let duration = t.close_time_ms - t.open_time_ms;
        total_duration += duration;
        s.max_duration_ms = s.max_duration_ms.max(duration);
    }
    if s.trades > 0 {
        s.win_rate = s.wins as f64 / s.trades as f64;
        s.avg_duration_ms = total_duration as f64 / s.trades as f64;
    }
    s
}

/// Largest peak-to-trough equity drop: `min(eq_i − max_{j≤i} eq_j)`, zero
/// for an empty or never-declining curve.
pub fn max_drawdown(equity: &[(i64, f64)]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut mdd = 0.0_f64;
    for &(_, eq) in equity {
        peak = peak.max(eq);
        mdd = mdd.min(eq - peak);
    }
    mdd
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct EquityStats {
    pub points: usize,
    pub eq_min: f64,
    pub eq_max: f64,
    pub max_drawdown: f64,
}

/// Condensed view of an equity curve for run reports.
pub fn equity_stats(equity: &[(i64, f64)]) -> EquityStats {
    let mut eq_min = f64::INFINITY;
    let mut eq_max = f64::NEG_INFINITY;
    for &(_, eq) in equity {
        eq_min = eq_min.min(eq);
        eq_max = eq_max.max(eq);
    }
    if equity.is_empty() {
        eq_min = 0.0;
        eq_max = 0.0;
    }
    EquityStats {
        points: equity.len(),
        eq_min,
        eq_max,
        max_drawdown: max_drawdown(equity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Liquidity;
    use crate::types::Side;

    fn fill(id: &str, side: Side, qty: f64, price: f64, fee: f64, t: i64) -> Fill {
        Fill {
            order_id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side,
            quantity: qty,
            price,
            fee_usdt: fee,
            event_time_ms: t,
            liquidity: Liquidity::Taker,
        }
    }

    /// Scenario: Buy 1 @ 100 at t=0, sell 1 @ 110 at t=1000, no fees.
    /// Expected: One long round trip, net = gross = 10, duration tracked.
    #[test]
    fn test_single_long_round_trip() {
        let fills = vec![
            fill("entry", Side::Buy, 1.0, 100.0, 0.0, 0),
            fill("exit", Side::Sell, 1.0, 110.0, 0.0, 1_000),
        ];
        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 1);
        let t = &trips[0];
        assert_eq!(t.symbol, "BTCUSDT");
        assert_eq!(t.direction, TradeDirection::Long);
        assert_eq!(t.open_time_ms, 0);
        assert_eq!(t.close_time_ms, 1_000);
        assert!((t.gross_pnl_usdt - 10.0).abs() < 1e-12);
        assert!((t.net_pnl_usdt - 10.0).abs() < 1e-12);
        assert_eq!(t.fees_usdt, 0.0);

        let s = summarize_round_trips(&trips);
        assert_eq!(s.trades, 1);
        assert_eq!(s.wins, 1);
        assert_eq!(s.losses, 0);
        assert!((s.win_rate - 1.0).abs() < 1e-12);
        assert!((s.net_pnl_usdt - 10.0).abs() < 1e-12);
        assert!((s.avg_duration_ms - 1_000.0).abs() < 1e-12);
        assert_eq!(s.max_duration_ms, 1_000);
    }

    /// Scenario: Buy 1 @ 100, then sell 2 @ 110 (flip).
    /// Expected: The first trip closes with +10; a short segment of 1
    /// remains open and produces no trip.
    #[test]
    fn test_flip_closes_first_trip_and_opens_new() {
        let fills = vec![
            fill("f1", Side::Buy, 1.0, 100.0, 0.0, 0),
            fill("f2", Side::Sell, 2.0, 110.0, 0.0, 1_000),
        ];
        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].direction, TradeDirection::Long);
        assert!((trips[0].net_pnl_usdt - 10.0).abs() < 1e-12);
    }

    /// Scenario: Fees of 0.1 on each leg of a +10 round trip.
    /// Expected: fees 0.2, gross 10, net 9.8.
    #[test]
    fn test_fees_included_in_net() {
        let fills = vec![
            fill("entry", Side::Buy, 1.0, 100.0, 0.1, 0),
            fill("exit", Side::Sell, 1.0, 110.0, 0.1, 1_000),
        ];
        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 1);
        assert!((trips[0].fees_usdt - 0.2).abs() < 1e-12);
        assert!((trips[0].gross_pnl_usdt - 10.0).abs() < 1e-12);
        assert!((trips[0].net_pnl_usdt - 9.8).abs() < 1e-12);
    }

    /// Scenario: Flip fill carrying a 0.2 fee, closing 1 of its 2 units.
    /// Expected: Half the fee goes to the closed trip, half to the newly
    /// opened segment (visible when that one closes).
    #[test]
    fn test_flip_fee_split_proportionally() {
        let fills = vec![
            fill("f1", Side::Buy, 1.0, 100.0, 0.1, 0),
            fill("f2", Side::Sell, 2.0, 110.0, 0.2, 1_000),
            fill("f3", Side::Buy, 1.0, 110.0, 0.0, 2_000),
        ];
        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 2);
        assert!((trips[0].fees_usdt - 0.2).abs() < 1e-12); // 0.1 entry + 0.1 share
        assert_eq!(trips[1].direction, TradeDirection::Short);
        assert!((trips[1].fees_usdt - 0.1).abs() < 1e-12); // carried share
        assert!((trips[1].gross_pnl_usdt - 0.0).abs() < 1e-12);
    }

    /// Scenario: Partial reduces before the final close.
    /// Expected: One trip covering the full closed quantity with summed
    /// PnL.
    #[test]
    fn test_partial_reduces_accumulate_into_one_trip() {
        let fills = vec![
            fill("f1", Side::Buy, 2.0, 100.0, 0.0, 0),
            fill("f2", Side::Sell, 0.5, 110.0, 0.0, 1_000),
            fill("f3", Side::Sell, 1.5, 120.0, 0.0, 2_000),
        ];
        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 1);
        let t = &trips[0];
        assert!((t.quantity - 2.0).abs() < 1e-12);
        assert!((t.gross_pnl_usdt - (0.5 * 10.0 + 1.5 * 20.0)).abs() < 1e-12);
        assert_eq!(t.close_time_ms, 2_000);
    }

    /// Scenario: Short round trip: sell 1 @ 110, buy back 1 @ 100.
    /// Expected: Direction short, gross +10.
    #[test]
    fn test_short_round_trip() {
        let fills = vec![
            fill("entry", Side::Sell, 1.0, 110.0, 0.0, 0),
            fill("exit", Side::Buy, 1.0, 100.0, 0.0, 1_000),
        ];
        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].direction, TradeDirection::Short);
        assert!((trips[0].gross_pnl_usdt - 10.0).abs() < 1e-12);
    }

    /// Scenario: Interleaved fills across two symbols.
    /// Expected: Ledgers are independent; each symbol closes its own trip.
    #[test]
    fn test_symbols_tracked_independently() {
        let mut eth_entry = fill("e1", Side::Buy, 1.0, 50.0, 0.0, 100);
        eth_entry.symbol = "ETHUSDT".to_string();
        let mut eth_exit = fill("e2", Side::Sell, 1.0, 55.0, 0.0, 900);
        eth_exit.symbol = "ETHUSDT".to_string();
        let fills = vec![
            fill("b1", Side::Buy, 1.0, 100.0, 0.0, 0),
            eth_entry,
            eth_exit,
            fill("b2", Side::Sell, 1.0, 101.0, 0.0, 1_000),
        ];
        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].symbol, "ETHUSDT");
        assert!((trips[0].net_pnl_usdt - 5.0).abs() < 1e-12);
        assert_eq!(trips[1].symbol, "BTCUSDT");
        assert!((trips[1].net_pnl_usdt - 1.0).abs() < 1e-12);
    }

    /// Scenario: Fill-derived trades vs portfolio funding.
    /// Expected: A flat buy/sell pair nets zero even if the portfolio took
    /// funding in between; funding never leaks into round trips.
    #[test]
    fn test_round_trips_exclude_funding() {
        let fills = vec![
            fill("entry", Side::Buy, 1.0, 100.0, 0.0, 0),
            fill("exit", Side::Sell, 1.0, 100.0, 0.0, 1_000),
        ];

        let mut pf = crate::portfolio::Portfolio::new();
        pf.apply_fill("BTCUSDT", Side::Buy, 1.0, 100.0, 0.0);
        let funding = pf.apply_funding("BTCUSDT", 100.0, 0.01);
        assert!((funding - (-1.0)).abs() < 1e-12);

        let trips = round_trips_from_fills(&fills);
        assert_eq!(trips.len(), 1);
        assert!((trips[0].net_pnl_usdt - 0.0).abs() < 1e-12);
    }

    /// Scenario: Equity curve 0, 10, 5, 12, 7.
    /// Expected: Max drawdown −5.
    #[test]
    fn test_max_drawdown() {
        let eq = vec![(0, 0.0), (1, 10.0), (2, 5.0), (3, 12.0), (4, 7.0)];
        assert!((max_drawdown(&eq) - (-5.0)).abs() < 1e-12);
    }

    /// Scenario: Two separate curves.
    /// Expected: Drawdown computed from the provided curve only.
    #[test]
    fn test_max_drawdown_uses_provided_curve_only() {
        let eq_a = vec![(0, 0.0), (1, 2.0), (2, 1.0)];
        let eq_b = vec![(0, 0.0), (1, 10.0), (2, 9.0), (3, 8.0)];
        assert!((max_drawdown(&eq_a) - (-1.0)).abs() < 1e-12);
        assert!((max_drawdown(&eq_b) - (-2.0)).abs() < 1e-12);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    /// Scenario: Equity stats over a small curve, and over no curve.
    /// Expected: Min/max/drawdown agree with the points; empty input gives
    /// zeroed stats.
    #[test]
    fn test_equity_stats() {
        let eq = vec![(0, 0.0), (1, 10.0), (2, 5.0), (3, 12.0), (4, 7.0)];
        let s = equity_stats(&eq);
        assert_eq!(s.points, 5);
        assert_eq!(s.eq_min, 0.0);
        assert_eq!(s.eq_max, 12.0);
        assert!((s.max_drawdown - (-5.0)).abs() < 1e-12);

        let empty = equity_stats(&[]);
        assert_eq!(empty.points, 0);
        assert_eq!(empty.eq_min, 0.0);
        assert_eq!(empty.eq_max, 0.0);
        assert_eq!(empty.max_drawdown, 0.0);
    }

    /// Scenario: Serialization of a summary for export.
    /// Expected: Plain JSON object with snake_case numeric fields.
    #[test]
    fn test_summary_serializes() {
        let s = summarize_round_trips(&[]);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"net_pnl_usdt\":0.0"));
        assert!(json.contains("\"trades\":0"));
    }
}
