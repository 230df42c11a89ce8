//! Core turn machine implementation
//!
//! Holds a validated transition table and drives states from the initial
//! state to a terminal outcome, one state at a time.

use std::collections::{BTreeSet, HashMap, HashSet};

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::data::{Key, TurnData, Userdata};
use super::state::{StateError, TurnState};
use crate::events::TurnEvent;

/// Where a transition leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Continue with another state
    State(String),
    /// Finish the turn with a terminal outcome
    Outcome(String),
}

/// Result of one machine execution
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Terminal outcome the machine finished with
    pub outcome: String,
    /// Turn data as left by the last state
    pub data: TurnData,
    /// Number of state executions
    pub transitions: u32,
}

/// Errors from building or executing a turn machine
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("turn machine has no states")]
    Empty,

    #[error("state `{0}` is registered twice")]
    DuplicateState(String),

    #[error("`{0}` names both a state and a terminal outcome")]
    NameClash(String),

    #[error("initial state `{0}` is not registered")]
    UnknownInitial(String),

    #[error("state `{0}` is not registered")]
    UnknownState(String),

    #[error("state `{state}` has no transition for outcome `{outcome}`")]
    MissingTransition { state: String, outcome: String },

    #[error("state `{state}` does not declare outcome `{outcome}`")]
    UndeclaredOutcome { state: String, outcome: String },

    #[error("transition `{state}` --{outcome}--> `{target}` leads nowhere")]
    UnknownTarget {
        state: String,
        outcome: String,
        target: String,
    },

    #[error("state `{state}` reads `{key}` which is not written on every path to it")]
    UnsatisfiedInput { state: String, key: Key },

    #[error("state `{state}` failed: {source}")]
    State {
        state: String,
        #[source]
        source: StateError,
    },

    #[error("turn interrupted by shutdown")]
    Cancelled,
}

struct Registered {
    name: String,
    state: Box<dyn TurnState>,
    transitions: Vec<(String, String)>,
}

/// Builder collecting states and transitions before validation
pub struct TurnMachineBuilder {
    outcomes: Vec<String>,
    states: Vec<Registered>,
    initial: Option<String>,
    event_tx: Option<broadcast::Sender<TurnEvent>>,
}

impl TurnMachineBuilder {
    /// Register a state and its `outcome -> target` transitions.
    ///
    /// A target may name a state or a terminal outcome. The first state
    /// added is the initial state unless [`initial`](Self::initial) says
    /// otherwise.
    pub fn add(
        mut self,
        name: &str,
        state: impl TurnState + 'static,
        transitions: &[(&str, &str)],
    ) -> Self {
        self.states.push(Registered {
            name: name.to_owned(),
            state: Box::new(state),
            transitions: transitions
                .iter()
                .map(|(outcome, target)| ((*outcome).to_owned(), (*target).to_owned()))
                .collect(),
        });
        self
    }

    /// Choose the state execution starts in
    pub fn initial(mut self, name: &str) -> Self {
        self.initial = Some(name.to_owned());
        self
    }

    /// Emit [`TurnEvent`]s on this channel
    pub fn events(mut self, event_tx: broadcast::Sender<TurnEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Validate the table and produce the machine
    pub fn build(self) -> Result<TurnMachine, MachineError> {
        let initial = match (&self.initial, self.states.first()) {
            (Some(name), _) => name.clone(),
            (None, Some(first)) => first.name.clone(),
            (None, None) => return Err(MachineError::Empty),
        };

        let outcomes: HashSet<String> = self.outcomes.into_iter().collect();
        let mut states: HashMap<String, Box<dyn TurnState>> = HashMap::new();
        let mut raw_transitions = Vec::new();

        for registered in self.states {
            if outcomes.contains(&registered.name) {
                return Err(MachineError::NameClash(registered.name));
            }
            if states.contains_key(&registered.name) {
                return Err(MachineError::DuplicateState(registered.name));
            }
            raw_transitions.push((registered.name.clone(), registered.transitions));
            states.insert(registered.name, registered.state);
        }

        if !states.contains_key(&initial) {
            return Err(MachineError::UnknownInitial(initial));
        }

        let mut transitions: HashMap<String, HashMap<String, Target>> = HashMap::new();
        for (name, edges) in raw_transitions {
            let declared = states[&name].outcomes();
            let mut table = HashMap::new();

            for (outcome, target) in edges {
                if !declared.contains(&outcome.as_str()) {
                    return Err(MachineError::UndeclaredOutcome {
                        state: name,
                        outcome,
                    });
                }
                let target = if states.contains_key(&target) {
                    Target::State(target)
                } else if outcomes.contains(&target) {
                    Target::Outcome(target)
                } else {
                    return Err(MachineError::UnknownTarget {
                        state: name,
                        outcome,
                        target,
                    });
                };
                table.insert(outcome, target);
            }

            if let Some(missing) = declared.iter().find(|o| !table.contains_key(**o)) {
                return Err(MachineError::MissingTransition {
                    state: name,
                    outcome: (*missing).to_owned(),
                });
            }

            transitions.insert(name, table);
        }

        let machine = TurnMachine {
            states,
            transitions,
            initial,
            outcomes,
            event_tx: self.event_tx,
        };
        machine.check_data_flow()?;

        debug!(
            initial = %machine.initial,
            states = machine.states.len(),
            "turn machine built"
        );
        Ok(machine)
    }
}

/// A validated graph of turn states
pub struct TurnMachine {
    states: HashMap<String, Box<dyn TurnState>>,
    transitions: HashMap<String, HashMap<String, Target>>,
    initial: String,
    outcomes: HashSet<String>,
    event_tx: Option<broadcast::Sender<TurnEvent>>,
}

impl TurnMachine {
    /// Start building a machine that may finish with any of `outcomes`
    pub fn builder(outcomes: &[&str]) -> TurnMachineBuilder {
        TurnMachineBuilder {
            outcomes: outcomes.iter().map(|o| (*o).to_owned()).collect(),
            states: Vec::new(),
            initial: None,
            event_tx: None,
        }
    }

    /// Name of the state every execution starts in
    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Terminal outcomes this machine can finish with
    pub fn outcomes(&self) -> &HashSet<String> {
        &self.outcomes
    }

    /// Look up where `outcome` of `state` leads
    pub fn resolve(&self, state: &str, outcome: &str) -> Option<&Target> {
        self.transitions.get(state)?.get(outcome)
    }

    /// Execute one turn with fresh turn data
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<TurnReport, MachineError> {
        let started = Instant::now();
        let mut data = TurnData::default();
        let mut current: &str = &self.initial;
        let mut transitions: u32 = 0;

        info!(initial = %current, "turn started");

        loop {
            if cancel.is_cancelled() {
                return Err(MachineError::Cancelled);
            }

            let state = self
                .states
                .get(current)
                .ok_or_else(|| MachineError::UnknownState(current.to_owned()))?;

            self.emit(TurnEvent::StateEntered {
                state: current.to_owned(),
            });
            let entered = Instant::now();

            let result = {
                let mut view = Userdata::new(&mut data, state.input_keys(), state.output_keys());
                state.execute(&mut view, cancel).await
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(StateError::Cancelled) => return Err(MachineError::Cancelled),
                Err(source) => {
                    warn!(state = %current, error = %source, "state failed");
                    return Err(MachineError::State {
                        state: current.to_owned(),
                        source,
                    });
                }
            };

            let duration_ms = entered.elapsed().as_millis() as u64;
            transitions += 1;

            self.emit(TurnEvent::StateExited {
                state: current.to_owned(),
                outcome: outcome.to_owned(),
                duration_ms,
            });

            match self.resolve(current, outcome) {
                Some(Target::State(next)) => {
                    info!(
                        from = %current,
                        to = %next,
                        outcome,
                        duration_ms,
                        "state transition"
                    );
                    current = next;
                }
                Some(Target::Outcome(terminal)) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    info!(
                        state = %current,
                        outcome = %terminal,
                        transitions,
                        duration_ms,
                        "turn finished"
                    );
                    self.emit(TurnEvent::TurnCompleted {
                        outcome: terminal.clone(),
                        transitions,
                        duration_ms,
                    });
                    return Ok(TurnReport {
                        outcome: terminal.clone(),
                        data,
                        transitions,
                    });
                }
                None => {
                    return Err(MachineError::UndeclaredOutcome {
                        state: current.to_owned(),
                        outcome: outcome.to_owned(),
                    });
                }
            }
        }
    }

    /// Execute turns back to back until cancelled.
    /// Returns the number of completed turns.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<u64, MachineError> {
        let mut turns = 0;

        loop {
            match self.execute(cancel).await {
                Ok(report) => {
                    turns += 1;
                    debug!(turn = turns, outcome = %report.outcome, "turn loop iteration");
                }
                Err(MachineError::Cancelled) => {
                    info!(turns, "turn loop stopped");
                    return Ok(turns);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.event_tx {
            debug!(%event, "emitting turn event");
            let _ = tx.send(event);
        }
    }

    /// Check that every input of every state is written on all paths to it
    fn check_data_flow(&self) -> Result<(), MachineError> {
        let all: BTreeSet<Key> = Key::ALL.into_iter().collect();
        let mut available: HashMap<&str, BTreeSet<Key>> = self
            .states
            .keys()
            .map(|name| (name.as_str(), all.clone()))
            .collect();
        available.insert(self.initial.as_str(), BTreeSet::new());

        let mut changed = true;
        while changed {
            changed = false;
            for (from, table) in &self.transitions {
                let state = &self.states[from];
                for (outcome, target) in table {
                    let Target::State(to) = target else { continue };

                    let mut carried = available[from.as_str()].clone();
                    carried.extend(state.writes_on(outcome).iter().copied());

                    let Some(entry) = available.get_mut(to.as_str()) else { continue };
                    let narrowed: BTreeSet<Key> = entry.intersection(&carried).copied().collect();
                    if narrowed != *entry {
                        *entry = narrowed;
                        changed = true;
                    }
                }
            }
        }

        for (name, state) in &self.states {
            if let Some(key) = state
                .input_keys()
                .iter()
                .find(|key| !available[name.as_str()].contains(*key))
            {
                return Err(MachineError::UnsatisfiedInput {
                    state: name.clone(),
                    key: *key,
                });
            }
        }

        Ok(())
    }
}
