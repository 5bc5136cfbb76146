pub mod cancellation;
pub mod l3;
pub mod order_event;
pub mod trade;

pub use cancellation::{Cancellation, CancellationEvent};
pub use l3::{L3Entry, L3Record, L3RecordContainer};
pub use order_event::OrderEvent;
pub use trade::{Trade, TradeContext};
