use serde_json::{Value, json};

use crate::book::Order;

/// A placement record: the full order as admitted, tagged `event: "place"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent {
    pub order: Order,
}

impl OrderEvent {
    pub fn new(order: Order) -> Self {
        Self { order }
    }

    /// Public JSON form: every order field plus the event tag.
    pub fn json_value(&self) -> Value {
        let mut json = self.order.json_value();
        json.as_object_mut()
            .unwrap()
            .insert("event".into(), json!("place"));
        json
    }
}
