use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};
use strum_macros::EnumString;

use crate::{impl_add_sub_primitive, impl_display_primitive, impl_from_primitive};

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// A point in simulated time, in nanoseconds since the start of the run.
///
/// Simulated time has nothing to do with the wall clock: it only ever moves
/// when the driver delivers a message, and two runs over the same inputs
/// visit exactly the same sequence of timestamps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);
impl_from_primitive!(Timestamp, u64);
impl_display_primitive!(Timestamp);

/// A span of simulated time, in nanoseconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timespan(pub u64);
impl_from_primitive!(Timespan, u64);
impl_add_sub_primitive!(Timespan, u64);
impl_display_primitive!(Timespan);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    /// The span from `earlier` up to `self`. Saturates instead of wrapping
    /// so that a stale reference never produces an absurd span.
    pub fn since(self, earlier: Timestamp) -> Timespan {
        Timespan(self.0.saturating_sub(earlier.0))
    }
}

impl std::ops::Add<Timespan> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timespan) -> Self::Output {
        Timestamp(self.0 + rhs.0)
    }
}

/// An exchange-assigned order identifier, unique per book.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct OrderId(pub u64);
impl_from_primitive!(OrderId, u64);
impl_display_primitive!(OrderId);

/// A client-assigned order identifier, echoed back in responses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ClientOrderId(pub u64);
impl_from_primitive!(ClientOrderId, u64);
impl_display_primitive!(ClientOrderId);

/// Identifies an agent within a simulation. Negative ids are reserved for
/// exchange-internal actors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct AgentId(pub i64);
impl_from_primitive!(AgentId, i64);
impl_display_primitive!(AgentId);

/// Identifies a limit-order book. Within one compute block this is the local
/// index; on the wire between blocks it is the canonicalized global id
/// (`block_idx * block_dim + local_id`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct BookId(pub u32);
impl_from_primitive!(BookId, u32);
impl_display_primitive!(BookId);

/// Index of a parallel compute block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct BlockIdx(pub u32);
impl_from_primitive!(BlockIdx, u32);
impl_display_primitive!(BlockIdx);

/// Identifies a leveraged position, monotonic within one agent's balances.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct LoanId(pub u64);
impl_from_primitive!(LoanId, u64);
impl_display_primitive!(LoanId);

// ================================================================================================
// Domain Enums
// ================================================================================================

/// Side of an order. For a trade, the recorded direction is the aggressor's.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    Buy,
    Sell,
}

impl OrderDirection {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// The wire form: 0 for BUY, 1 for SELL.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Buy => 0,
            Self::Sell => 1,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Buy),
            1 => Some(Self::Sell),
            _ => None,
        }
    }
}

/// How long an order stays eligible for matching.
///
/// Absence on an order means good-till-cancelled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Rest on the book until filled or cancelled.
    Gtc,
    /// Fill what is available immediately, cancel the remainder.
    Ioc,
    /// Fill completely or cancel without trading at all.
    Fok,
}

/// Self-trade prevention flag carried on every order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StpFlag {
    /// Cancel the resting order, let the aggressor keep matching.
    #[default]
    CancelOldest,
    /// Cancel the aggressing order's remainder.
    CancelNewest,
    /// Cancel both sides.
    CancelBoth,
    /// Decrement the larger order by the smaller one's volume, cancel the smaller.
    DecrementBoth,
}

/// One leg of a trading pair.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Currency {
    Base = 0,
    Quote = 1,
}
