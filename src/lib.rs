// === Public Modules (The Canonical Paths) ===
pub mod accounting;
pub mod agent;
pub mod book;
pub mod config;
pub mod decimal;
pub mod error;
pub mod event;
pub mod exchange;
pub mod message;
pub mod simulation;
pub mod subscription;
pub mod types;

// === Private Implementation Details ===
mod macros;
mod serde;

// === Convenience ===
pub mod sorted_vec_map;

// === Facades (Re-exporting internals) ===
pub use crate::agent::{Agent, AgentCtx};
pub use crate::config::SimulationConfig;
pub use crate::error::{MultibookError, MultibookResult};
pub use crate::exchange::MultiBookExchangeAgent;
pub use crate::message::{Message, MessageQueue, Payload, PrioritizedMessage};
pub use crate::simulation::{Simulation, SimulationSignals, SimulationState};
