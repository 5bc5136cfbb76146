use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    decimal::decimal_to_f64,
    types::{AgentId, ClientOrderId, OrderDirection, OrderId, StpFlag, TimeInForce, Timespan, Timestamp},
};

/// A resting or incoming order.
///
/// `volume` is the remaining unfilled size; it only ever shrinks, through
/// [`Order::fill`] on a match or a partial cancellation. An absent `price`
/// marks a market order, which can never rest on a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub agent_id: AgentId,
    pub client_order_id: Option<ClientOrderId>,
    pub direction: OrderDirection,
    pub price: Option<Decimal>,
    pub volume: Decimal,
    pub leverage: Decimal,
    pub time_in_force: Option<TimeInForce>,
    pub post_only: Option<bool>,
    pub expiry_period: Option<Timespan>,
    pub stp_flag: StpFlag,
    pub timestamp: Timestamp,
}

impl Order {
    /// Remaining unfilled size.
    pub fn total_volume(&self) -> Decimal {
        self.volume
    }

    pub fn is_market(&self) -> bool {
        self.price.is_none()
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiry_period
            .is_some_and(|period| now >= self.timestamp + period)
    }

    /// Consumes `volume` from the remaining size.
    pub fn fill(&mut self, volume: Decimal) {
        self.volume -= volume;
    }

    /// Public JSON form, used inside book snapshots.
    pub fn json_value(&self) -> Value {
        let mut json = json!({
            "orderId": self.id.0,
            "agentId": self.agent_id.0,
            "direction": self.direction.to_wire(),
            "price": self.price.map(decimal_to_f64),
            "volume": decimal_to_f64(self.volume),
            "leverage": decimal_to_f64(self.leverage),
            "stpFlag": self.stp_flag.to_string(),
            "timestamp": self.timestamp.0,
        });
        let obj = json.as_object_mut().unwrap();
        if let Some(client_order_id) = self.client_order_id {
            obj.insert("clientOrderId".into(), json!(client_order_id.0));
        }
        if let Some(tif) = self.time_in_force {
            obj.insert("timeInForce".into(), json!(tif.to_string()));
        }
        if let Some(post_only) = self.post_only {
            obj.insert("postOnly".into(), json!(post_only));
        }
        if let Some(expiry) = self.expiry_period {
            obj.insert("expiryPeriod".into(), json!(expiry.0));
        }
        json
    }
}

/// Checkpoint mirror of [`Order`] with packed decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCheckpoint {
    pub id: OrderId,
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<ClientOrderId>,
    pub direction: OrderDirection,
    #[serde(with = "crate::serde::packed_opt")]
    pub price: Option<Decimal>,
    #[serde(with = "crate::serde::packed")]
    pub volume: Decimal,
    #[serde(with = "crate::serde::packed")]
    pub leverage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_period: Option<Timespan>,
    pub stp_flag: StpFlag,
    pub timestamp: Timestamp,
}

impl From<&Order> for OrderCheckpoint {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            agent_id: order.agent_id,
            client_order_id: order.client_order_id,
            direction: order.direction,
            price: order.price,
            volume: order.volume,
            leverage: order.leverage,
            time_in_force: order.time_in_force,
            post_only: order.post_only,
            expiry_period: order.expiry_period,
            stp_flag: order.stp_flag,
            timestamp: order.timestamp,
        }
    }
}

impl From<OrderCheckpoint> for Order {
    fn from(ckpt: OrderCheckpoint) -> Self {
        Self {
            id: ckpt.id,
            agent_id: ckpt.agent_id,
            client_order_id: ckpt.client_order_id,
            direction: ckpt.direction,
            price: ckpt.price,
            volume: ckpt.volume,
            leverage: ckpt.leverage,
            time_in_force: ckpt.time_in_force,
            post_only: ckpt.post_only,
            expiry_period: ckpt.expiry_period,
            stp_flag: ckpt.stp_flag,
            timestamp: ckpt.timestamp,
        }
    }
}
