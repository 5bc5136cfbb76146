use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::{decimal::decimal_to_f64, types::OrderId};

/// One price level: the FIFO queue of order ids resting at `price`, plus the
/// running volume aggregate.
///
/// The aggregate is maintained incrementally so best-level reads stay O(1).
/// That only holds if every volume-changing mutation goes through the ladder
/// API, which is why the mutating methods here are crate-private: callers
/// reach ticks through [`OrderContainer`](super::ladder::OrderContainer),
/// which mirrors each delta into its own aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tick {
    price: Decimal,
    orders: VecDeque<OrderId>,
    volume: Decimal,
}

impl Tick {
    pub(super) fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
            volume: Decimal::ZERO,
        }
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    /// Aggregate remaining volume across the queued orders.
    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Id of the order at the front of the time-priority queue.
    pub fn front(&self) -> Option<OrderId> {
        self.orders.front().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.orders.iter().copied()
    }

    /// Appends an order and grows the aggregate by its remaining volume.
    pub(super) fn push_back(&mut self, id: OrderId, total_volume: Decimal) {
        self.orders.push_back(id);
        self.volume += total_volume;
    }

    /// Removes the head of the queue. Deliberately leaves the aggregate
    /// untouched: consumption is accounted through `update_volume` at the
    /// moment of the fill, which may precede the pop (partial fills).
    pub(super) fn pop_front(&mut self) -> Option<OrderId> {
        self.orders.pop_front()
    }

    /// Removes an arbitrary order id (cancellation path).
    pub(super) fn remove(&mut self, id: OrderId) -> bool {
        match self.orders.iter().position(|&queued| queued == id) {
            Some(pos) => {
                self.orders.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(super) fn update_volume(&mut self, delta: Decimal) {
        self.volume += delta;
    }

    /// Public JSON form: `{price, orders: [...], volume}` with the per-order
    /// price column elided (it is the tick's).
    pub fn json_value(&self, order_json: impl Fn(OrderId) -> Option<Value>) -> Value {
        let orders: Vec<Value> = self
            .iter()
            .filter_map(|id| {
                order_json(id).map(|mut json| {
                    if let Some(obj) = json.as_object_mut() {
                        obj.remove("price");
                    }
                    json
                })
            })
            .collect();
        json!({
            "price": decimal_to_f64(self.price),
            "orders": orders,
            "volume": decimal_to_f64(self.volume),
        })
    }
}
