//! Events module for turn machine progress
//!
//! Provides structured event types for state entry, state exit and
//! turn completion, broadcast to the IPC server and any other observer.

use serde::{Deserialize, Serialize};

/// Events emitted by the turn machine while it executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A state is about to run
    StateEntered {
        /// Name of the state in the transition table
        state: String,
    },

    /// A state finished with an outcome label
    StateExited {
        state: String,
        outcome: String,
        /// Time spent inside the state in milliseconds
        duration_ms: u64,
    },

    /// The machine reached a terminal outcome
    TurnCompleted {
        outcome: String,
        /// Number of state executions in this turn
        transitions: u32,
        duration_ms: u64,
    },
}

impl std::fmt::Display for TurnEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnEvent::StateEntered { state } => write!(f, "STATE_ENTERED ({})", state),
            TurnEvent::StateExited {
                state,
                outcome,
                duration_ms,
            } => write!(f, "STATE_EXITED ({} -> {}, {}ms)", state, outcome, duration_ms),
            TurnEvent::TurnCompleted {
                outcome,
                transitions,
                duration_ms,
            } => write!(
                f,
                "TURN_COMPLETED ({}, {} transitions, {}ms)",
                outcome, transitions, duration_ms
            ),
        }
    }
}
