use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{AgentId, BookId, LoanId, OrderId};

pub type MultibookResult<T> = Result<T, MultibookError>;

#[derive(Debug, Error)]
pub enum MultibookError {
    #[error(transparent)]
    Accounting(#[from] AccountingError),

    #[error(transparent)]
    Book(#[from] BookError),

    #[error(transparent)]
    Decimal(#[from] DecimalError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Errors from balance, reservation, and loan bookkeeping.
#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("Rounding decimals must be > 0, was {0}")]
    InvalidDecimalPlaces(u32),

    #[error("Insufficient free funds: requested {requested}, free {free}")]
    InsufficientFree { requested: Decimal, free: Decimal },

    #[error("Insufficient reserved funds: requested {requested}, reserved {reserved}")]
    InsufficientReserved {
        requested: Decimal,
        reserved: Decimal,
    },

    #[error("Invalid leverage: {0} (must be > 0)")]
    InvalidLeverage(Decimal),

    #[error("No loan with id {0}")]
    UnknownLoan(LoanId),

    #[error("No balances registered for agent {0}")]
    UnknownAgent(AgentId),
}

/// Errors related to book structure and order lookup.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("No book with id {0} on this block")]
    UnknownBookId(BookId),

    #[error("No order with id {0}")]
    UnknownOrderId(OrderId),

    #[error("No live price level at {0}")]
    UnknownPriceLevel(Decimal),

    #[error("Market orders carry no price and cannot rest on the book")]
    UnpricedRestingOrder,
}

/// Errors from the exact-decimal layer.
#[derive(Debug, Error)]
pub enum DecimalError {
    #[error("Value {0} does not fit the packed 64-bit decimal encoding")]
    Unpackable(Decimal),

    #[error("Packed value {packed:#x} is not a canonical packed decimal: {reason}")]
    MalformedPacked { packed: u64, reason: &'static str },

    #[error("Value {0} is not representable as a decimal")]
    Unrepresentable(f64),
}

/// Errors from message construction, payload decoding, and dispatch.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Unknown payload type: '{0}'")]
    UnknownPayloadType(String),

    #[error("Malformed '{payload_type}' payload: {reason}")]
    MalformedPayload {
        payload_type: String,
        reason: String,
    },

    #[error("Failed to decode payload JSON")]
    Json(#[from] serde_json::Error),

    #[error("Failed to decode payload MessagePack")]
    MsgPack(#[from] rmp_serde::decode::Error),

    #[error("Message names no targets")]
    EmptyTargets,
}

/// Errors from fee-policy construction.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Fee rate {0} out of range [0, 1)")]
    InvalidFeeRate(Decimal),

    #[error("VIP agent id upper bound ({hi}) must be greater than lower bound ({lo})")]
    InvalidVipRange { lo: AgentId, hi: AgentId },
}

/// Errors related to the driver state machine and checkpoint reload.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Book state is ill-formed JSON: {0}")]
    MalformedBookState(String),

    #[error("No agent registered under the name '{0}'")]
    UnknownTarget(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
