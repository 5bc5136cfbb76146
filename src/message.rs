pub mod factory;
pub mod payload;
pub mod queue;
pub mod thread_safe;

pub use factory::PayloadFactory;
pub use payload::{Payload, RejectionReason};
pub use queue::{MessageQueue, PrioritizedMessage};
pub use thread_safe::ThreadSafeMessageQueue;

use itertools::Itertools;
use serde_json::{Value, json};

use crate::{
    error::MessageError,
    message::payload::{DistributedAgentResponsePayload, type_str},
    types::{AgentId, Timespan, Timestamp},
};

/// Delimiter between names in a target string.
pub const TARGET_DELIM: char = '|';

/// The reserved target routing to the multi-book exchange agent.
pub const EXCHANGE_TARGET: &str = "EXCHANGE";

/// A routed simulation message.
///
/// `arrival = occurrence + delay` is when the driver delivers it; the queue
/// orders messages by arrival (see [`MessageQueue`]). Targets are parsed from
/// a `|`-delimited string, de-duplicated, in written order.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub occurrence: Timestamp,
    pub arrival: Timestamp,
    pub source: String,
    pub targets: Vec<String>,
    pub message_type: String,
    pub payload: Payload,
}

impl Message {
    pub fn new(
        occurrence: Timestamp,
        arrival: Timestamp,
        source: impl Into<String>,
        target: &str,
        message_type: impl Into<String>,
        payload: Payload,
    ) -> Result<Self, MessageError> {
        let targets = split_targets(target);
        if targets.is_empty() {
            return Err(MessageError::EmptyTargets);
        }
        Ok(Self {
            occurrence,
            arrival: arrival.max(occurrence),
            source: source.into(),
            targets,
            message_type: message_type.into(),
            payload,
        })
    }

    pub fn delay(&self) -> Timespan {
        self.arrival.since(self.occurrence)
    }

    pub fn target_string(&self) -> String {
        self.targets.iter().join(&TARGET_DELIM.to_string())
    }

    /// Public JSON header plus payload body.
    pub fn json_value(&self) -> Result<Value, MessageError> {
        Ok(json!({
            "timestamp": self.occurrence.0,
            "delay": self.delay().0,
            "source": self.source,
            "target": self.target_string(),
            "type": self.message_type,
            "payload": self.payload.json_value()?,
        }))
    }

    /// Parses a wire message: `{timestamp, delay, source, target, type, payload}`.
    pub fn from_json_message(json: &Value) -> Result<Self, MessageError> {
        let timestamp = header_u64(json, "timestamp")?;
        let delay = header_u64(json, "delay")?;
        let payload_type = header_str(json, "type")?;
        let payload = PayloadFactory::from_json(payload_type, field(json, "payload")?)?;
        Self::new(
            Timestamp(timestamp),
            Timestamp(timestamp + delay),
            header_str(json, "source")?,
            header_str(json, "target")?,
            payload_type,
            payload,
        )
    }

    /// Parses a distributed agent's response: `{agentId, payload, delay, type}`.
    ///
    /// The resulting message is addressed to the exchange, its type rewritten
    /// as `DISTRIBUTED_<type>`, and its payload wrapped so dispatch can tell
    /// remote decisions from local ones.
    pub fn from_json_response(
        json: &Value,
        timestamp: Timestamp,
        source: &str,
    ) -> Result<Self, MessageError> {
        let delay = header_u64(json, "delay")?;
        let payload_type = header_str(json, "type")?;
        let inner = PayloadFactory::from_json(payload_type, field(json, "payload")?)?;
        let agent_id = AgentId(header_i64(json, "agentId")?);
        Self::new(
            timestamp,
            timestamp + Timespan(delay),
            source,
            EXCHANGE_TARGET,
            format!("{}{payload_type}", type_str::DISTRIBUTED_PREFIX),
            Payload::DistributedAgentResponse(DistributedAgentResponsePayload {
                agent_id,
                payload: Box::new(inner),
            }),
        )
    }
}

/// Splits a target string on [`TARGET_DELIM`], dropping empty segments and
/// duplicates while preserving first-seen order.
pub fn split_targets(target: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for name in target.split(TARGET_DELIM) {
        if !name.is_empty() && !targets.iter().any(|seen| seen == name) {
            targets.push(name.to_string());
        }
    }
    targets
}

fn field<'a>(json: &'a Value, key: &str) -> Result<&'a Value, MessageError> {
    json.get(key).ok_or_else(|| MessageError::MalformedPayload {
        payload_type: "<header>".into(),
        reason: format!("missing field '{key}'"),
    })
}

fn header_u64(json: &Value, key: &str) -> Result<u64, MessageError> {
    field(json, key)?
        .as_u64()
        .ok_or_else(|| MessageError::MalformedPayload {
            payload_type: "<header>".into(),
            reason: format!("field '{key}' is not an unsigned integer"),
        })
}

fn header_i64(json: &Value, key: &str) -> Result<i64, MessageError> {
    field(json, key)?
        .as_i64()
        .ok_or_else(|| MessageError::MalformedPayload {
            payload_type: "<header>".into(),
            reason: format!("field '{key}' is not an integer"),
        })
}

fn header_str<'a>(json: &'a Value, key: &str) -> Result<&'a str, MessageError> {
    field(json, key)?
        .as_str()
        .ok_or_else(|| MessageError::MalformedPayload {
            payload_type: "<header>".into(),
            reason: format!("field '{key}' is not a string"),
        })
}
