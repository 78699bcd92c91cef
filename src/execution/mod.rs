pub mod queue_model;
pub mod taker;

use crate::types::Side;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Ioc,
}

/// An order as submitted by a strategy. Owned by the broker once submitted.
#[derive(Clone, Debug)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub post_only: bool,
    pub reduce_only: bool,
    pub created_time_ms: i64,
}

impl Order {
    pub fn market(id: impl Into<String>, symbol: impl Into<String>, side: Side, quantity: f64) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            time_in_force: TimeInForce::Gtc,
            post_only: false,
            reduce_only: false,
            created_time_ms: 0,
        }
    }

    pub fn limit(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
    ) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            time_in_force: TimeInForce::Gtc,
            post_only: false,
            reduce_only: false,
            created_time_ms: 0,
        }
    }
}
