pub mod ladder;
pub mod order;
pub mod tick;

pub use ladder::OrderContainer;
pub use order::{Order, OrderCheckpoint};
pub use tick::Tick;

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    decimal::decimal_to_f64,
    error::BookError,
    types::{AgentId, BookId, OrderDirection, OrderId},
};

/// Top-of-book snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L1Snapshot {
    #[serde(with = "crate::serde::approx_opt")]
    pub best_bid_price: Option<Decimal>,
    #[serde(with = "crate::serde::approx_opt")]
    pub best_bid_volume: Option<Decimal>,
    #[serde(with = "crate::serde::approx_opt")]
    pub best_ask_price: Option<Decimal>,
    #[serde(with = "crate::serde::approx_opt")]
    pub best_ask_volume: Option<Decimal>,
    #[serde(with = "crate::serde::approx_opt")]
    pub last_trade_price: Option<Decimal>,
}

/// Outcome of a cancellation against the book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CancellationOutcome {
    pub order_id: OrderId,
    pub price: Decimal,
    pub cancelled_volume: Decimal,
    /// Volume still resting after a partial cancel; zero when fully removed.
    pub remaining_volume: Decimal,
}

/// A single limit-order book.
///
/// The book owns every resting order in a stable arena keyed by order id;
/// ticks refer to orders by id only. Cross-references therefore never dangle:
/// an id disappears from its tick queue and from the arena in the same
/// mutation.
#[derive(Debug, Clone, Default)]
pub struct Book {
    id: BookId,
    bids: OrderContainer,
    asks: OrderContainer,
    last_trade_price: Option<Decimal>,
    orders: BTreeMap<OrderId, Order>,
}

impl Book {
    pub fn new(id: BookId) -> Self {
        Self {
            id,
            bids: OrderContainer::bids(),
            asks: OrderContainer::asks(),
            last_trade_price: None,
            orders: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> BookId {
        self.id
    }

    pub fn bids(&self) -> &OrderContainer {
        &self.bids
    }

    pub fn asks(&self) -> &OrderContainer {
        &self.asks
    }

    pub fn side(&self, side: OrderDirection) -> &OrderContainer {
        match side {
            OrderDirection::Buy => &self.bids,
            OrderDirection::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: OrderDirection) -> &mut OrderContainer {
        match side {
            OrderDirection::Buy => &mut self.bids,
            OrderDirection::Sell => &mut self.asks,
        }
    }

    pub fn last_trade_price(&self) -> Option<Decimal> {
        self.last_trade_price
    }

    pub fn set_last_trade_price(&mut self, price: Decimal) {
        self.last_trade_price = Some(price);
    }

    pub fn order(&self, id: OrderId) -> Result<&Order, BookError> {
        self.orders.get(&id).ok_or(BookError::UnknownOrderId(id))
    }

    pub fn contains_order(&self, id: OrderId) -> bool {
        self.orders.contains_key(&id)
    }

    /// All resting orders, ascending by order id.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn agent_orders(&self, agent_id: AgentId) -> impl Iterator<Item = &Order> {
        self.orders
            .values()
            .filter(move |order| order.agent_id == agent_id)
    }

    pub fn best_bid(&self) -> Option<&Tick> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<&Tick> {
        self.asks.best()
    }

    /// Admits a priced order to the back of its level.
    pub fn place_resting(&mut self, order: Order) -> Result<(), BookError> {
        self.side_mut(order.direction).push_back(&order)?;
        self.orders.insert(order.id, order);
        Ok(())
    }

    /// Id of the order an aggressor against `resting_side` would match next.
    pub fn front_order(&self, resting_side: OrderDirection) -> Option<OrderId> {
        self.side(resting_side).best().and_then(Tick::front)
    }

    /// Consumes `volume` from a resting order, keeping tick and ladder
    /// aggregates exact. Fully consumed orders leave the queue and the arena.
    /// Returns `true` when the order was fully consumed.
    pub fn fill_order(&mut self, id: OrderId, volume: Decimal) -> Result<bool, BookError> {
        let order = self.orders.get_mut(&id).ok_or(BookError::UnknownOrderId(id))?;
        let price = order.price.ok_or(BookError::UnpricedRestingOrder)?;
        let side = order.direction;
        order.fill(volume);
        let fully_consumed = order.total_volume().is_zero();

        let ladder = self.side_mut(side);
        ladder.update_volume(price, -volume)?;
        if fully_consumed {
            let front = ladder
                .tick(price)
                .and_then(Tick::front)
                .is_some_and(|front| front == id);
            if front {
                ladder.pop_front(price)?;
            } else {
                ladder.remove_order(price, id, Decimal::ZERO)?;
            }
            self.orders.remove(&id);
        }
        Ok(fully_consumed)
    }

    /// Cancels an order, fully (`volume == None`) or partially.
    ///
    /// A partial cancel that requests at least the remaining volume collapses
    /// into a full cancel.
    pub fn cancel(
        &mut self,
        id: OrderId,
        volume: Option<Decimal>,
    ) -> Result<CancellationOutcome, BookError> {
        let order = self.orders.get_mut(&id).ok_or(BookError::UnknownOrderId(id))?;
        let price = order.price.ok_or(BookError::UnpricedRestingOrder)?;
        let side = order.direction;
        let remaining = order.total_volume();

        let requested = volume.unwrap_or(remaining);
        if requested >= remaining {
            self.side_mut(side).remove_order(price, id, remaining)?;
            self.orders.remove(&id);
            return Ok(CancellationOutcome {
                order_id: id,
                price,
                cancelled_volume: remaining,
                remaining_volume: Decimal::ZERO,
            });
        }

        order.fill(requested);
        let remaining_after = order.total_volume();
        self.side_mut(side).update_volume(price, -requested)?;
        Ok(CancellationOutcome {
            order_id: id,
            price,
            cancelled_volume: requested,
            remaining_volume: remaining_after,
        })
    }

    pub fn l1(&self) -> L1Snapshot {
        L1Snapshot {
            best_bid_price: self.best_bid().map(Tick::price),
            best_bid_volume: self.best_bid().map(Tick::volume),
            best_ask_price: self.best_ask().map(Tick::price),
            best_ask_volume: self.best_ask().map(Tick::volume),
            last_trade_price: self.last_trade_price,
        }
    }

    /// Public JSON form of the full book state.
    pub fn json_value(&self) -> Value {
        let side_json = |side: &OrderContainer| -> Vec<Value> {
            side.iter()
                .map(|tick| {
                    tick.json_value(|id| self.orders.get(&id).map(Order::json_value))
                })
                .collect()
        };
        json!({
            "bookId": self.id.0,
            "bids": side_json(&self.bids),
            "asks": side_json(&self.asks),
            "lastTradePrice": self.last_trade_price.map(decimal_to_f64),
        })
    }

    pub fn checkpoint(&self) -> BookCheckpoint {
        let side_checkpoint = |side: &OrderContainer| -> Vec<TickCheckpoint> {
            side.iter()
                .map(|tick| TickCheckpoint {
                    price: tick.price(),
                    orders: tick
                        .iter()
                        .filter_map(|id| self.orders.get(&id).map(OrderCheckpoint::from))
                        .collect(),
                    volume: tick.volume(),
                })
                .collect()
        };
        BookCheckpoint {
            id: self.id,
            bids: side_checkpoint(&self.bids),
            asks: side_checkpoint(&self.asks),
            last_trade_price: self.last_trade_price,
        }
    }

    /// Rebuilds a book from its checkpoint form. Aggregates are recomputed
    /// from the orders themselves rather than trusted from the file.
    pub fn from_checkpoint(ckpt: BookCheckpoint) -> Result<Self, BookError> {
        let mut book = Book::new(ckpt.id);
        for tick in ckpt.bids.into_iter().chain(ckpt.asks) {
            for order in tick.orders {
                book.place_resting(order.into())?;
            }
        }
        if let Some(price) = ckpt.last_trade_price {
            book.set_last_trade_price(price);
        }
        Ok(book)
    }
}

/// Checkpoint mirror of one tick: `{price, orders: […], volume}` with
/// decimals packed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickCheckpoint {
    #[serde(with = "crate::serde::packed")]
    pub price: Decimal,
    pub orders: Vec<OrderCheckpoint>,
    #[serde(with = "crate::serde::packed")]
    pub volume: Decimal,
}

/// Checkpoint mirror of a whole book.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookCheckpoint {
    pub id: BookId,
    pub bids: Vec<TickCheckpoint>,
    pub asks: Vec<TickCheckpoint>,
    #[serde(with = "crate::serde::packed_opt")]
    pub last_trade_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StpFlag, Timestamp};
    use rust_decimal_macros::dec;

    fn order(id: u64, direction: OrderDirection, price: Decimal, volume: Decimal) -> Order {
        Order {
            id: OrderId(id),
            agent_id: AgentId(id as i64),
            client_order_id: None,
            direction,
            price: Some(price),
            volume,
            leverage: dec!(1),
            time_in_force: None,
            post_only: None,
            expiry_period: None,
            stp_flag: StpFlag::default(),
            timestamp: Timestamp(0),
        }
    }

    fn sample_book() -> Book {
        let mut book = Book::new(BookId(0));
        book.place_resting(order(1, OrderDirection::Buy, dec!(99), dec!(2)))
            .unwrap();
        book.place_resting(order(2, OrderDirection::Buy, dec!(100), dec!(1)))
            .unwrap();
        book.place_resting(order(3, OrderDirection::Sell, dec!(101), dec!(4)))
            .unwrap();
        book.place_resting(order(4, OrderDirection::Sell, dec!(101), dec!(1)))
            .unwrap();
        book
    }

    /// Side aggregate, recomputed the slow way.
    fn side_volume_from_orders(book: &Book, side: OrderDirection) -> Decimal {
        book.orders()
            .filter(|o| o.direction == side)
            .map(Order::total_volume)
            .sum()
    }

    #[test]
    fn volume_invariant_after_placement() {
        let book = sample_book();
        assert_eq!(book.bids().volume(), dec!(3));
        assert_eq!(book.asks().volume(), dec!(5));
        assert_eq!(
            book.bids().volume(),
            side_volume_from_orders(&book, OrderDirection::Buy)
        );
        assert_eq!(
            book.asks().volume(),
            side_volume_from_orders(&book, OrderDirection::Sell)
        );
    }

    #[test]
    fn fill_consumes_in_time_priority() {
        let mut book = sample_book();

        // The ask level at 101 queues order 3 before order 4.
        assert_eq!(book.front_order(OrderDirection::Sell), Some(OrderId(3)));

        let done = book.fill_order(OrderId(3), dec!(4)).unwrap();
        assert!(done);
        assert!(!book.contains_order(OrderId(3)));
        assert_eq!(book.front_order(OrderDirection::Sell), Some(OrderId(4)));
        assert_eq!(book.asks().volume(), dec!(1));
    }

    #[test]
    fn partial_fill_keeps_order_in_place() {
        let mut book = sample_book();
        let done = book.fill_order(OrderId(3), dec!(1.5)).unwrap();
        assert!(!done);
        assert_eq!(book.order(OrderId(3)).unwrap().total_volume(), dec!(2.5));
        assert_eq!(book.asks().volume(), dec!(3.5));
        assert_eq!(
            book.asks().volume(),
            side_volume_from_orders(&book, OrderDirection::Sell)
        );
    }

    #[test]
    fn full_cancel_removes_order() {
        let mut book = sample_book();
        let outcome = book.cancel(OrderId(2), None).unwrap();
        assert_eq!(outcome.cancelled_volume, dec!(1));
        assert_eq!(outcome.remaining_volume, dec!(0));
        assert_eq!(outcome.price, dec!(100));
        assert!(!book.contains_order(OrderId(2)));
        assert_eq!(book.best_bid().unwrap().price(), dec!(99));
    }

    #[test]
    fn partial_cancel_reduces_volume() {
        let mut book = sample_book();
        let outcome = book.cancel(OrderId(3), Some(dec!(1))).unwrap();
        assert_eq!(outcome.cancelled_volume, dec!(1));
        assert_eq!(outcome.remaining_volume, dec!(3));
        assert_eq!(book.asks().volume(), dec!(4));
    }

    #[test]
    fn oversized_partial_cancel_collapses_to_full() {
        let mut book = sample_book();
        let outcome = book.cancel(OrderId(4), Some(dec!(10))).unwrap();
        assert_eq!(outcome.cancelled_volume, dec!(1));
        assert!(!book.contains_order(OrderId(4)));
    }

    #[test]
    fn l1_reflects_best_levels() {
        let mut book = sample_book();
        book.set_last_trade_price(dec!(100.5));
        let l1 = book.l1();
        assert_eq!(l1.best_bid_price, Some(dec!(100)));
        assert_eq!(l1.best_bid_volume, Some(dec!(1)));
        assert_eq!(l1.best_ask_price, Some(dec!(101)));
        assert_eq!(l1.best_ask_volume, Some(dec!(5)));
        assert_eq!(l1.last_trade_price, Some(dec!(100.5)));
    }

    #[test]
    fn checkpoint_roundtrip_preserves_queue_order() {
        let mut original = sample_book();
        original.set_last_trade_price(dec!(100));

        let json = serde_json::to_string(&original.checkpoint()).unwrap();
        let ckpt: BookCheckpoint = serde_json::from_str(&json).unwrap();
        let restored = Book::from_checkpoint(ckpt).unwrap();

        assert_eq!(restored.bids().volume(), original.bids().volume());
        assert_eq!(restored.asks().volume(), original.asks().volume());
        assert_eq!(
            restored.front_order(OrderDirection::Sell),
            original.front_order(OrderDirection::Sell)
        );
        assert_eq!(restored.last_trade_price(), Some(dec!(100)));
    }

    #[test]
    fn json_value_elides_per_order_price() {
        let book = sample_book();
        let json = book.json_value();
        let first_ask_orders = json["asks"][0]["orders"].as_array().unwrap();
        assert_eq!(first_ask_orders.len(), 2);
        assert!(first_ask_orders[0].get("price").is_none());
        assert_eq!(json["asks"][0]["price"], 101.0);
    }
}
