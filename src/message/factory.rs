use serde_json::Value;

use crate::{
    error::MessageError,
    message::payload::{
        BookStateMessagePayload, CancelOrdersErrorResponsePayload, CancelOrdersPayload,
        CancelOrdersResponsePayload, EventTradePayload, Payload,
        PlaceOrderLimitErrorResponsePayload, PlaceOrderLimitPayload,
        PlaceOrderLimitResponsePayload, PlaceOrderMarketErrorResponsePayload,
        PlaceOrderMarketPayload, PlaceOrderMarketResponsePayload, RetrieveBookPayload,
        RetrieveL1Payload, RetrieveL1ResponsePayload, RetrieveOrdersPayload,
        RetrieveOrdersResponsePayload, type_str,
    },
};

/// Builds concrete payloads from a `(type string, body)` pair.
///
/// The table is explicit: one arm per type string, resolved at compile time.
/// Types with the `DISTRIBUTED_` prefix recurse on the bare inner type.
/// Anything else fails with [`MessageError::UnknownPayloadType`].
pub struct PayloadFactory;

impl PayloadFactory {
    pub fn from_json(payload_type: &str, body: &Value) -> Result<Payload, MessageError> {
        if let Some(inner_type) = payload_type.strip_prefix(type_str::DISTRIBUTED_PREFIX) {
            return Self::from_json(inner_type, body);
        }

        fn parse<T: serde::de::DeserializeOwned>(
            payload_type: &str,
            body: &Value,
        ) -> Result<T, MessageError> {
            serde_json::from_value(body.clone()).map_err(|e| MessageError::MalformedPayload {
                payload_type: payload_type.to_string(),
                reason: e.to_string(),
            })
        }

        let payload = match payload_type {
            type_str::EMPTY => Payload::Empty,
            type_str::PLACE_ORDER_MARKET => {
                Payload::PlaceOrderMarket(parse::<PlaceOrderMarketPayload>(payload_type, body)?)
            }
            type_str::PLACE_ORDER_MARKET_RESPONSE => Payload::PlaceOrderMarketResponse(parse::<
                PlaceOrderMarketResponsePayload,
            >(
                payload_type, body
            )?),
            type_str::PLACE_ORDER_MARKET_ERROR_RESPONSE => Payload::PlaceOrderMarketErrorResponse(
                parse::<PlaceOrderMarketErrorResponsePayload>(payload_type, body)?,
            ),
            type_str::PLACE_ORDER_LIMIT => {
                Payload::PlaceOrderLimit(parse::<PlaceOrderLimitPayload>(payload_type, body)?)
            }
            type_str::PLACE_ORDER_LIMIT_RESPONSE => Payload::PlaceOrderLimitResponse(parse::<
                PlaceOrderLimitResponsePayload,
            >(
                payload_type, body
            )?),
            type_str::PLACE_ORDER_LIMIT_ERROR_RESPONSE => Payload::PlaceOrderLimitErrorResponse(
                parse::<PlaceOrderLimitErrorResponsePayload>(payload_type, body)?,
            ),
            type_str::CANCEL_ORDERS => {
                Payload::CancelOrders(parse::<CancelOrdersPayload>(payload_type, body)?)
            }
            type_str::CANCEL_ORDERS_RESPONSE => Payload::CancelOrdersResponse(parse::<
                CancelOrdersResponsePayload,
            >(
                payload_type, body
            )?),
            type_str::CANCEL_ORDERS_ERROR_RESPONSE => Payload::CancelOrdersErrorResponse(parse::<
                CancelOrdersErrorResponsePayload,
            >(
                payload_type, body
            )?),
            type_str::RETRIEVE_ORDERS => {
                Payload::RetrieveOrders(parse::<RetrieveOrdersPayload>(payload_type, body)?)
            }
            type_str::RETRIEVE_ORDERS_RESPONSE => Payload::RetrieveOrdersResponse(parse::<
                RetrieveOrdersResponsePayload,
            >(
                payload_type, body
            )?),
            type_str::RETRIEVE_L1 => {
                Payload::RetrieveL1(parse::<RetrieveL1Payload>(payload_type, body)?)
            }
            type_str::RETRIEVE_L1_RESPONSE => {
                Payload::RetrieveL1Response(parse::<RetrieveL1ResponsePayload>(payload_type, body)?)
            }
            type_str::RETRIEVE_BOOK => {
                Payload::RetrieveBook(parse::<RetrieveBookPayload>(payload_type, body)?)
            }
            type_str::BOOK_STATE => {
                Payload::BookState(parse::<BookStateMessagePayload>(payload_type, body)?)
            }
            type_str::EVENT_TRADE => {
                Payload::EventTrade(parse::<EventTradePayload>(payload_type, body)?)
            }
            unknown => return Err(MessageError::UnknownPayloadType(unknown.to_string())),
        };
        Ok(payload)
    }

    /// MessagePack entry point: decodes the body into the JSON data model and
    /// reuses the same table.
    pub fn from_msgpack(payload_type: &str, body: &[u8]) -> Result<Payload, MessageError> {
        let value: Value = rmp_serde::from_slice(body)?;
        Self::from_json(payload_type, &value)
    }
}
