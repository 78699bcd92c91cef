//! Shared test fixtures: compact constructors for events and pre-filled
//! books. Only compiled under `#[cfg(test)]`.

use crate::book::Books;
use crate::types::{DepthUpdate, Liquidation, MarkPrice, OpenInterest, Ticker, Trade};

pub fn depth(
    event_time_ms: i64,
    symbol: &str,
    final_update_id: i64,
    prev_final_update_id: i64,
    bid_updates: &[(f64, f64)],
    ask_updates: &[(f64, f64)],
) -> DepthUpdate {
    DepthUpdate {
        received_time_ns: 0,
        event_time_ms,
        transaction_time_ms: event_time_ms,
        symbol: symbol.to_string(),
        first_update_id: final_update_id,
        final_update_id,
        prev_final_update_id,
        bid_updates: bid_updates.to_vec(),
        ask_updates: ask_updates.to_vec(),
    }
}

pub fn trade(
    event_time_ms: i64,
    symbol: &str,
    trade_id: i64,
    price: f64,
    quantity: f64,
    is_buyer_maker: bool,
) -> Trade {
    Trade {
        received_time_ns: 0,
        event_time_ms,
        trade_time_ms: event_time_ms,
        symbol: symbol.to_string(),
        trade_id,
        price,
        quantity,
        is_buyer_maker,
    }
}

pub fn trade_with_recv(event_time_ms: i64, recv_ms: i64, symbol: &str, trade_id: i64) -> Trade {
    Trade {
        received_time_ns: recv_ms * 1_000_000,
        event_time_ms,
        trade_time_ms: event_time_ms,
        symbol: symbol.to_string(),
        trade_id,
        price: 100.0,
        quantity: 1.0,
        is_buyer_maker: true,
    }
}

pub fn mark(event_time_ms: i64, symbol: &str, mark_price: f64) -> MarkPrice {
    MarkPrice {
        received_time_ns: 0,
        event_time_ms,
        symbol: symbol.to_string(),
        mark_price,
        index_price: mark_price,
        funding_rate: 0.0,
        next_funding_time_ms: 0,
    }
}

pub fn ticker(event_time_ms: i64, symbol: &str) -> Ticker {
    Ticker {
        received_time_ns: 0,
        event_time_ms,
        symbol: symbol.to_string(),
        price_change: 1.0,
        price_change_percent: 0.1,
        weighted_average_price: 100.0,
        last_price: 101.0,
        last_quantity: 0.5,
        open_price: 99.0,
        high_price: 102.0,
        low_price: 98.0,
        base_asset_volume: 10.0,
        quote_asset_volume: 1_000.0,
        statistics_open_time_ms: 0,
        statistics_close_time_ms: event_time_ms,
        first_trade_id: 1,
        last_trade_id: 2,
        total_trades: 10,
    }
}

pub fn open_interest(event_time_ms: i64, symbol: &str) -> OpenInterest {
    OpenInterest {
        received_time_ns: 0,
        event_time_ms,
        timestamp_ms: event_time_ms,
        symbol: symbol.to_string(),
        sum_open_interest: 11.0,
        sum_open_interest_value: 1_100.0,
    }
}

pub fn oi_with_recv(timestamp_ms: i64, recv_ms: i64) -> OpenInterest {
    OpenInterest {
        received_time_ns: recv_ms * 1_000_000,
        event_time_ms: timestamp_ms,
        timestamp_ms,
        symbol: "BTCUSDT".to_string(),
        sum_open_interest: 1.0,
        sum_open_interest_value: 1.0,
    }
}

pub fn liquidation(event_time_ms: i64, symbol: &str) -> Liquidation {
    Liquidation {
        received_time_ns: 0,
        event_time_ms,
        symbol: symbol.to_string(),
        side: "BUY".to_string(),
        order_type: "LIMIT".to_string(),
        time_in_force: "IOC".to_string(),
        quantity: 0.1,
        price: 100.0,
        average_price: 100.0,
        order_status: "FILLED".to_string(),
        last_filled_quantity: 0.1,
        filled_quantity: 0.1,
        trade_time_ms: event_time_ms,
    }
}

pub fn books_with(symbol: &str, bids: &[(f64, f64)], asks: &[(f64, f64)]) -> Books {
    let mut books = Books::new();
    books.book(symbol).apply_depth_update(bids, asks);
    books
}
