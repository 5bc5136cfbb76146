use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Lifecycle of a simulation driver.
///
/// `Stopped` is terminal: reload-from-checkpoint reconstitutes a fresh
/// `Started` instance rather than transitioning back.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationState {
    #[default]
    Inactive,
    Started,
    Stopped,
}
