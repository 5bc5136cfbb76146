use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    book::L1Snapshot,
    error::{MessageError, SimulationError},
    event::{Cancellation, Trade, TradeContext},
    types::{AgentId, BookId, ClientOrderId, OrderDirection, OrderId, StpFlag, TimeInForce, Timespan},
};

fn default_leverage() -> Decimal {
    Decimal::ONE
}

/// Machine-readable cause carried by every error-response payload.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    PostOnlyCross,
    FillOrKillUnsatisfiable,
    SelfTradePrevented,
    ExpiredTimeInForce,
    InsufficientFunds,
    UnknownBookId,
    UnknownOrderId,
    InvalidVolume,
}

// ================================================================================================
// Request Payloads
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderMarketPayload {
    pub book_id: BookId,
    pub direction: OrderDirection,
    #[serde(with = "crate::serde::approx")]
    pub volume: Decimal,
    #[serde(with = "crate::serde::approx", default = "default_leverage")]
    pub leverage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<ClientOrderId>,
    #[serde(default)]
    pub stp_flag: StpFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderLimitPayload {
    pub book_id: BookId,
    pub direction: OrderDirection,
    #[serde(with = "crate::serde::approx")]
    pub price: Decimal,
    #[serde(with = "crate::serde::approx")]
    pub volume: Decimal,
    #[serde(with = "crate::serde::approx", default = "default_leverage")]
    pub leverage: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_period: Option<Timespan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<ClientOrderId>,
    #[serde(default)]
    pub stp_flag: StpFlag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrdersPayload {
    pub book_id: BookId,
    pub cancellations: Vec<Cancellation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveOrdersPayload {
    pub book_id: BookId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveL1Payload {
    pub book_id: BookId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveBookPayload {
    pub book_id: BookId,
}

// ================================================================================================
// Response Payloads
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderMarketResponsePayload {
    pub order_id: OrderId,
    pub request_payload: PlaceOrderMarketPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderMarketErrorResponsePayload {
    pub request_payload: PlaceOrderMarketPayload,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderLimitResponsePayload {
    pub order_id: OrderId,
    pub request_payload: PlaceOrderLimitPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderLimitErrorResponsePayload {
    pub request_payload: PlaceOrderLimitPayload,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrdersResponsePayload {
    pub request_payload: CancelOrdersPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrdersErrorResponsePayload {
    pub request_payload: CancelOrdersPayload,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveOrdersResponsePayload {
    pub book_id: BookId,
    /// Public JSON records of the requesting agent's resting orders.
    pub orders: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveL1ResponsePayload {
    pub book_id: BookId,
    pub l1: L1Snapshot,
}

// ================================================================================================
// Event & Wrapper Payloads
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTradePayload {
    pub book_id: BookId,
    pub context: TradeContext,
    pub trade: Trade,
}

/// Opaque serialized book state, produced by [`RetrieveBookPayload`] queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStateMessagePayload {
    pub book_state_json_str: String,
}

impl BookStateMessagePayload {
    /// Parses the carried state, failing on ill-formed JSON.
    pub fn parsed(&self) -> Result<Value, SimulationError> {
        serde_json::from_str(&self.book_state_json_str)
            .map_err(|e| SimulationError::MalformedBookState(e.to_string()))
    }
}

/// Wraps a payload that originated from a remote (distributed) agent.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedAgentResponsePayload {
    pub agent_id: AgentId,
    pub payload: Box<Payload>,
}

// ================================================================================================
// The Closed Payload Set
// ================================================================================================

/// Every payload the kernel routes, discriminated on the wire by a type
/// string (see [`Payload::type_string`]). The set is closed: canonicalization
/// and dispatch pattern-match exhaustively on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    PlaceOrderMarket(PlaceOrderMarketPayload),
    PlaceOrderMarketResponse(PlaceOrderMarketResponsePayload),
    PlaceOrderMarketErrorResponse(PlaceOrderMarketErrorResponsePayload),
    PlaceOrderLimit(PlaceOrderLimitPayload),
    PlaceOrderLimitResponse(PlaceOrderLimitResponsePayload),
    PlaceOrderLimitErrorResponse(PlaceOrderLimitErrorResponsePayload),
    CancelOrders(CancelOrdersPayload),
    CancelOrdersResponse(CancelOrdersResponsePayload),
    CancelOrdersErrorResponse(CancelOrdersErrorResponsePayload),
    RetrieveOrders(RetrieveOrdersPayload),
    RetrieveOrdersResponse(RetrieveOrdersResponsePayload),
    RetrieveL1(RetrieveL1Payload),
    RetrieveL1Response(RetrieveL1ResponsePayload),
    RetrieveBook(RetrieveBookPayload),
    BookState(BookStateMessagePayload),
    EventTrade(EventTradePayload),
    DistributedAgentResponse(DistributedAgentResponsePayload),
}

pub mod type_str {
    pub const EMPTY: &str = "EMPTY";
    pub const PLACE_ORDER_MARKET: &str = "PLACE_ORDER_MARKET";
    pub const PLACE_ORDER_MARKET_RESPONSE: &str = "PLACE_ORDER_MARKET_RESPONSE";
    pub const PLACE_ORDER_MARKET_ERROR_RESPONSE: &str = "PLACE_ORDER_MARKET_ERROR_RESPONSE";
    pub const PLACE_ORDER_LIMIT: &str = "PLACE_ORDER_LIMIT";
    pub const PLACE_ORDER_LIMIT_RESPONSE: &str = "PLACE_ORDER_LIMIT_RESPONSE";
    pub const PLACE_ORDER_LIMIT_ERROR_RESPONSE: &str = "PLACE_ORDER_LIMIT_ERROR_RESPONSE";
    pub const CANCEL_ORDERS: &str = "CANCEL_ORDERS";
    pub const CANCEL_ORDERS_RESPONSE: &str = "CANCEL_ORDERS_RESPONSE";
    pub const CANCEL_ORDERS_ERROR_RESPONSE: &str = "CANCEL_ORDERS_ERROR_RESPONSE";
    pub const RETRIEVE_ORDERS: &str = "RETRIEVE_ORDERS";
    pub const RETRIEVE_ORDERS_RESPONSE: &str = "RETRIEVE_ORDERS_RESPONSE";
    pub const RETRIEVE_L1: &str = "RETRIEVE_L1";
    pub const RETRIEVE_L1_RESPONSE: &str = "RETRIEVE_L1_RESPONSE";
    pub const RETRIEVE_BOOK: &str = "RETRIEVE_BOOK";
    pub const BOOK_STATE: &str = "BOOK_STATE";
    pub const EVENT_TRADE: &str = "EVENT_TRADE";

    /// Prefix the driver applies to message types carrying remote responses.
    pub const DISTRIBUTED_PREFIX: &str = "DISTRIBUTED_";
}

impl Payload {
    /// The wire type string. Distributed wrappers prepend the prefix to the
    /// inner payload's type.
    pub fn type_string(&self) -> String {
        match self {
            Self::Empty => type_str::EMPTY.into(),
            Self::PlaceOrderMarket(_) => type_str::PLACE_ORDER_MARKET.into(),
            Self::PlaceOrderMarketResponse(_) => type_str::PLACE_ORDER_MARKET_RESPONSE.into(),
            Self::PlaceOrderMarketErrorResponse(_) => {
                type_str::PLACE_ORDER_MARKET_ERROR_RESPONSE.into()
            }
            Self::PlaceOrderLimit(_) => type_str::PLACE_ORDER_LIMIT.into(),
            Self::PlaceOrderLimitResponse(_) => type_str::PLACE_ORDER_LIMIT_RESPONSE.into(),
            Self::PlaceOrderLimitErrorResponse(_) => {
                type_str::PLACE_ORDER_LIMIT_ERROR_RESPONSE.into()
            }
            Self::CancelOrders(_) => type_str::CANCEL_ORDERS.into(),
            Self::CancelOrdersResponse(_) => type_str::CANCEL_ORDERS_RESPONSE.into(),
            Self::CancelOrdersErrorResponse(_) => type_str::CANCEL_ORDERS_ERROR_RESPONSE.into(),
            Self::RetrieveOrders(_) => type_str::RETRIEVE_ORDERS.into(),
            Self::RetrieveOrdersResponse(_) => type_str::RETRIEVE_ORDERS_RESPONSE.into(),
            Self::RetrieveL1(_) => type_str::RETRIEVE_L1.into(),
            Self::RetrieveL1Response(_) => type_str::RETRIEVE_L1_RESPONSE.into(),
            Self::RetrieveBook(_) => type_str::RETRIEVE_BOOK.into(),
            Self::BookState(_) => type_str::BOOK_STATE.into(),
            Self::EventTrade(_) => type_str::EVENT_TRADE.into(),
            Self::DistributedAgentResponse(wrapper) => format!(
                "{}{}",
                type_str::DISTRIBUTED_PREFIX,
                wrapper.payload.type_string()
            ),
        }
    }

    /// Public JSON form of the payload body.
    pub fn json_value(&self) -> Result<Value, MessageError> {
        let json = match self {
            Self::Empty => Value::Object(Default::default()),
            Self::PlaceOrderMarket(p) => serde_json::to_value(p)?,
            Self::PlaceOrderMarketResponse(p) => serde_json::to_value(p)?,
            Self::PlaceOrderMarketErrorResponse(p) => serde_json::to_value(p)?,
            Self::PlaceOrderLimit(p) => serde_json::to_value(p)?,
            Self::PlaceOrderLimitResponse(p) => serde_json::to_value(p)?,
            Self::PlaceOrderLimitErrorResponse(p) => serde_json::to_value(p)?,
            Self::CancelOrders(p) => serde_json::to_value(p)?,
            Self::CancelOrdersResponse(p) => serde_json::to_value(p)?,
            Self::CancelOrdersErrorResponse(p) => serde_json::to_value(p)?,
            Self::RetrieveOrders(p) => serde_json::to_value(p)?,
            Self::RetrieveOrdersResponse(p) => serde_json::to_value(p)?,
            Self::RetrieveL1(p) => serde_json::to_value(p)?,
            Self::RetrieveL1Response(p) => serde_json::to_value(p)?,
            Self::RetrieveBook(p) => serde_json::to_value(p)?,
            Self::BookState(p) => p.parsed().map_err(|e| MessageError::MalformedPayload {
                payload_type: self.type_string(),
                reason: e.to_string(),
            })?,
            Self::EventTrade(p) => serde_json::to_value(p)?,
            Self::DistributedAgentResponse(wrapper) => {
                let mut json = serde_json::Map::new();
                json.insert("agentId".into(), Value::from(wrapper.agent_id.0));
                json.insert("type".into(), Value::from(wrapper.payload.type_string()));
                json.insert("payload".into(), wrapper.payload.json_value()?);
                Value::Object(json)
            }
        };
        Ok(json)
    }

    /// The book id this payload references, if any. Responses answer with
    /// their nested request's book id.
    pub fn book_id(&self) -> Option<BookId> {
        match self {
            Self::PlaceOrderMarket(p) => Some(p.book_id),
            Self::PlaceOrderMarketResponse(p) => Some(p.request_payload.book_id),
            Self::PlaceOrderMarketErrorResponse(p) => Some(p.request_payload.book_id),
            Self::PlaceOrderLimit(p) => Some(p.book_id),
            Self::PlaceOrderLimitResponse(p) => Some(p.request_payload.book_id),
            Self::PlaceOrderLimitErrorResponse(p) => Some(p.request_payload.book_id),
            Self::CancelOrders(p) => Some(p.book_id),
            Self::CancelOrdersResponse(p) => Some(p.request_payload.book_id),
            Self::CancelOrdersErrorResponse(p) => Some(p.request_payload.book_id),
            Self::RetrieveOrders(p) => Some(p.book_id),
            Self::RetrieveOrdersResponse(p) => Some(p.book_id),
            Self::RetrieveL1(p) => Some(p.book_id),
            Self::RetrieveL1Response(p) => Some(p.book_id),
            Self::RetrieveBook(p) => Some(p.book_id),
            Self::EventTrade(p) => Some(p.book_id),
            Self::Empty | Self::BookState(_) | Self::DistributedAgentResponse(_) => None,
        }
    }
}
