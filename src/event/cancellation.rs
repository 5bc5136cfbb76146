use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    decimal::decimal_to_f64,
    types::{OrderId, Timestamp},
};

/// A request to remove volume from a resting order. An absent `volume` means
/// the whole order goes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    #[serde(rename = "orderId")]
    pub id: OrderId,
    #[serde(with = "crate::serde::approx_opt")]
    pub volume: Option<Decimal>,
}

impl Cancellation {
    pub fn full(id: OrderId) -> Self {
        Self { id, volume: None }
    }

    pub fn partial(id: OrderId, volume: Decimal) -> Self {
        Self {
            id,
            volume: Some(volume),
        }
    }

    /// Public JSON form.
    pub fn json_value(&self) -> Value {
        json!({
            "event": "cancel",
            "orderId": self.id.0,
            "volume": self.volume.map(decimal_to_f64),
        })
    }

    /// Compact L3 form.
    pub fn l3_value(&self) -> Value {
        json!({
            "e": "cancel",
            "i": self.id.0,
            "v": self.volume.map(decimal_to_f64),
        })
    }
}

/// A cancellation as applied to the book: the request plus when it took
/// effect and at which price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CancellationEvent {
    #[serde(flatten)]
    pub cancellation: Cancellation,
    pub timestamp: Timestamp,
    #[serde(with = "crate::serde::approx")]
    pub price: Decimal,
}

impl CancellationEvent {
    pub fn json_value(&self) -> Value {
        let mut json = self.cancellation.json_value();
        let obj = json.as_object_mut().unwrap();
        obj.insert("timestamp".into(), json!(self.timestamp.0));
        obj.insert("price".into(), json!(decimal_to_f64(self.price)));
        json
    }
}
