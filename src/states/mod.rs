//! Turn states
//!
//! - `HearState`: waits for an utterance on the inbound topic
//! - `InterpretState`: runs an utterance through the command interpreter
//! - `SpeakState`: publishes fixed or computed text on the outbound topic

mod hear;
mod interpret;
mod speak;

pub use hear::{HearState, HEARD, TIMEOUT};
pub use interpret::InterpretState;
pub use speak::SpeakState;

/// Outcome of a state that did its job
pub const SUCCEEDED: &str = "succeeded";
/// Outcome of a state whose collaborator failed
pub const FAILED: &str = "failed";
