use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    decimal::decimal_to_f64,
    types::{AgentId, BookId, OrderDirection, OrderId, Timestamp},
};

/// A match between a resting and an aggressing order.
///
/// `direction` is the aggressor's side: a BUY trade lifted an ask, a SELL
/// trade hit a bid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub resting_order_id: OrderId,
    pub aggressing_order_id: OrderId,
    pub resting_agent_id: AgentId,
    pub aggressing_agent_id: AgentId,
    pub direction: OrderDirection,
    #[serde(with = "crate::serde::approx")]
    pub price: Decimal,
    #[serde(with = "crate::serde::approx")]
    pub volume: Decimal,
    pub timestamp: Timestamp,
}

impl Trade {
    pub fn json_value(&self) -> Value {
        json!({
            "event": "trade",
            "restingOrderId": self.resting_order_id.0,
            "aggressingOrderId": self.aggressing_order_id.0,
            "restingAgentId": self.resting_agent_id.0,
            "aggressingAgentId": self.aggressing_agent_id.0,
            "direction": self.direction.to_wire(),
            "price": decimal_to_f64(self.price),
            "volume": decimal_to_f64(self.volume),
            "timestamp": self.timestamp.0,
        })
    }

    /// Compact L3 form.
    pub fn l3_value(&self) -> Value {
        json!({
            "e": "trade",
            "r": self.resting_order_id.0,
            "a": self.aggressing_order_id.0,
            "d": self.direction.to_wire(),
            "p": decimal_to_f64(self.price),
            "v": decimal_to_f64(self.volume),
        })
    }
}

/// The book a trade belongs to, carried separately from the payload's own
/// book id so cross-block canonicalization can rewrite both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeContext {
    pub book_id: BookId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade() -> Trade {
        Trade {
            resting_order_id: OrderId(1),
            aggressing_order_id: OrderId(2),
            resting_agent_id: AgentId(10),
            aggressing_agent_id: AgentId(20),
            direction: OrderDirection::Buy,
            price: dec!(101),
            volume: dec!(0.5),
            timestamp: Timestamp(77),
        }
    }

    #[test]
    fn wire_roundtrip() {
        let original = trade();
        let json = serde_json::to_string(&original).unwrap();
        let restored: Trade = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn json_direction_is_aggressor_side() {
        let json = trade().json_value();
        assert_eq!(json["direction"], 0);
        assert_eq!(json["restingAgentId"], 10);
        assert_eq!(json["aggressingAgentId"], 20);
    }
}
