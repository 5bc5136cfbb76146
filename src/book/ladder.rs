use rust_decimal::Decimal;

use crate::{
    book::{order::Order, tick::Tick},
    error::BookError,
    sorted_vec_map::SortedVecMap,
    types::{OrderDirection, OrderId},
};

/// One side of a book: the price-sorted sequence of ticks with a mirrored
/// volume aggregate.
///
/// The bid ladder hands out levels in descending price order, the ask ladder
/// ascending, so `best()` and `iter()` always start at the level an incoming
/// aggressor would hit first.
///
/// Invariant: `self.volume() == Σ tick.volume()` across all ticks. Every
/// mutation that touches a tick's volume routes through this type so the
/// mirror stays exact.
#[derive(Debug, Clone, Default)]
pub struct OrderContainer {
    ticks: SortedVecMap<Decimal, Tick>,
    volume: Decimal,
    descending: bool,
}

impl OrderContainer {
    /// The bid side; best level is the highest price.
    pub fn bids() -> Self {
        Self {
            descending: true,
            ..Self::default()
        }
    }

    /// The ask side; best level is the lowest price.
    pub fn asks() -> Self {
        Self::default()
    }

    pub fn for_side(side: OrderDirection) -> Self {
        match side {
            OrderDirection::Buy => Self::bids(),
            OrderDirection::Sell => Self::asks(),
        }
    }

    /// Aggregate remaining volume across every tick on this side.
    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Number of live price levels.
    pub fn depth(&self) -> usize {
        self.ticks.len()
    }

    /// The level an aggressor would match first.
    pub fn best(&self) -> Option<&Tick> {
        if self.descending {
            self.ticks.last().map(|(_, tick)| tick)
        } else {
            self.ticks.first().map(|(_, tick)| tick)
        }
    }

    pub fn tick(&self, price: Decimal) -> Option<&Tick> {
        self.ticks.get(&price)
    }

    /// Ticks in match-priority order.
    pub fn iter(&self) -> Box<dyn DoubleEndedIterator<Item = &Tick> + '_> {
        if self.descending {
            Box::new(self.ticks.values().rev())
        } else {
            Box::new(self.ticks.values())
        }
    }

    /// Appends `order` to the back of its price level, creating the level if
    /// needed, and grows both the tick and the ladder aggregate by the
    /// order's remaining volume.
    pub fn push_back(&mut self, order: &Order) -> Result<(), BookError> {
        let price = order.price.ok_or(BookError::UnpricedRestingOrder)?;
        let total_volume = order.total_volume();
        self.ticks
            .get_mut_or_insert_with(price, || Tick::new(price))
            .push_back(order.id, total_volume);
        self.volume += total_volume;
        Ok(())
    }

    /// Applies a volume delta at `price`, mirrored into the ladder aggregate.
    pub fn update_volume(&mut self, price: Decimal, delta: Decimal) -> Result<(), BookError> {
        let tick = self
            .ticks
            .get_mut(&price)
            .ok_or(BookError::UnknownPriceLevel(price))?;
        tick.update_volume(delta);
        self.volume += delta;
        Ok(())
    }

    /// Pops the order at the front of the level at `price`. Volume is not
    /// adjusted here; consumption is accounted through [`Self::update_volume`]
    /// at fill time. Fully drained levels are dropped.
    pub fn pop_front(&mut self, price: Decimal) -> Result<Option<OrderId>, BookError> {
        let tick = self
            .ticks
            .get_mut(&price)
            .ok_or(BookError::UnknownPriceLevel(price))?;
        let popped = tick.pop_front();
        if tick.is_empty() {
            debug_assert!(
                tick.volume().is_zero(),
                "drained tick at {price} left residual volume {}",
                tick.volume()
            );
            self.ticks.remove(&price);
        }
        Ok(popped)
    }

    /// Removes an order from the middle of its level (cancellation path) and
    /// shrinks both aggregates by its remaining volume.
    pub fn remove_order(
        &mut self,
        price: Decimal,
        id: OrderId,
        remaining_volume: Decimal,
    ) -> Result<(), BookError> {
        let tick = self
            .ticks
            .get_mut(&price)
            .ok_or(BookError::UnknownPriceLevel(price))?;
        if !tick.remove(id) {
            return Err(BookError::UnknownOrderId(id));
        }
        tick.update_volume(-remaining_volume);
        self.volume -= remaining_volume;
        if tick.is_empty() {
            self.ticks.remove(&price);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentId, StpFlag, Timestamp};
    use rust_decimal_macros::dec;

    fn order(id: u64, direction: OrderDirection, price: Decimal, volume: Decimal) -> Order {
        Order {
            id: OrderId(id),
            agent_id: AgentId(1),
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

    #[test]
    fn push_back_mirrors_volume_into_ladder() {
        let mut asks = OrderContainer::asks();
        asks.push_back(&order(1, OrderDirection::Sell, dec!(101), dec!(2)))
            .unwrap();
        asks.push_back(&order(2, OrderDirection::Sell, dec!(101), dec!(3)))
            .unwrap();
        asks.push_back(&order(3, OrderDirection::Sell, dec!(102), dec!(1)))
            .unwrap();

        assert_eq!(asks.volume(), dec!(6));
        assert_eq!(asks.tick(dec!(101)).unwrap().volume(), dec!(5));
        assert_eq!(asks.best().unwrap().price(), dec!(101));
    }

    #[test]
    fn bid_side_is_descending() {
        let mut bids = OrderContainer::bids();
        for (id, price) in [(1, dec!(99)), (2, dec!(101)), (3, dec!(100))] {
            bids.push_back(&order(id, OrderDirection::Buy, price, dec!(1)))
                .unwrap();
        }
        assert_eq!(bids.best().unwrap().price(), dec!(101));
        let prices: Vec<_> = bids.iter().map(Tick::price).collect();
        assert_eq!(prices, vec![dec!(101), dec!(100), dec!(99)]);
    }

    #[test]
    fn consume_then_pop_keeps_aggregates_exact() {
        let mut asks = OrderContainer::asks();
        asks.push_back(&order(1, OrderDirection::Sell, dec!(50), dec!(4)))
            .unwrap();

        // Partial fill of 1.5, then the rest, then the pop.
        asks.update_volume(dec!(50), dec!(-1.5)).unwrap();
        assert_eq!(asks.volume(), dec!(2.5));
        asks.update_volume(dec!(50), dec!(-2.5)).unwrap();
        let popped = asks.pop_front(dec!(50)).unwrap();
        assert_eq!(popped, Some(OrderId(1)));

        assert!(asks.is_empty());
        assert_eq!(asks.volume(), dec!(0));
    }

    #[test]
    fn remove_order_from_queue_middle() {
        let mut bids = OrderContainer::bids();
        bids.push_back(&order(1, OrderDirection::Buy, dec!(10), dec!(1)))
            .unwrap();
        bids.push_back(&order(2, OrderDirection::Buy, dec!(10), dec!(2)))
            .unwrap();
        bids.push_back(&order(3, OrderDirection::Buy, dec!(10), dec!(3)))
            .unwrap();

        bids.remove_order(dec!(10), OrderId(2), dec!(2)).unwrap();

        let tick = bids.tick(dec!(10)).unwrap();
        assert_eq!(tick.volume(), dec!(4));
        let queue: Vec<_> = tick.iter().collect();
        assert_eq!(queue, vec![OrderId(1), OrderId(3)]);
        assert_eq!(bids.volume(), dec!(4));
    }

    #[test]
    fn remove_unknown_order_fails() {
        let mut bids = OrderContainer::bids();
        bids.push_back(&order(1, OrderDirection::Buy, dec!(10), dec!(1)))
            .unwrap();
        assert!(matches!(
            bids.remove_order(dec!(10), OrderId(9), dec!(1)),
            Err(BookError::UnknownOrderId(_))
        ));
        assert!(matches!(
            bids.remove_order(dec!(11), OrderId(1), dec!(1)),
            Err(BookError::UnknownPriceLevel(_))
        ));
    }
}
