//! Turn machine module
//!
//! Provides the executor that drives turn states through an explicit,
//! validated transition table:
//! - `data`: the typed turn data and the per-state access view
//! - `state`: the trait every turn state implements
//! - `machine`: builder, validation and execution

mod data;
#[allow(clippy::module_inception)]
mod machine;
mod state;

pub use data::{Key, Userdata};
pub use machine::{MachineError, TurnMachine};
pub use state::{StateError, TurnState};

#[cfg(test)]
pub use data::TurnData;
#[cfg(test)]
pub use machine::Target;
