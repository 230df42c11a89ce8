//! Turn-scoped data shared between states
//!
//! Every state sees the turn data through a [`Userdata`] view that only
//! lets it read the keys it declares as inputs and write the keys it
//! declares as outputs.

use serde::{Deserialize, Serialize};

/// Named slots of the turn data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    /// Utterance text recognized from speech
    HearedData,
    /// Instruction produced by the command interpreter
    Command,
    /// Conversational answer produced by the interpreter
    OllamaAnswer,
}

impl Key {
    pub const ALL: [Key; 3] = [Key::HearedData, Key::Command, Key::OllamaAnswer];

    pub fn as_str(self) -> &'static str {
        match self {
            Key::HearedData => "heared_data",
            Key::Command => "command",
            Key::OllamaAnswer => "ollama_answer",
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record carried through one execution of the turn machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnData {
    pub heared_data: Option<String>,
    pub command: Option<String>,
    pub ollama_answer: Option<String>,
}

impl TurnData {
    /// Current value of `key`, if written
    pub fn get(&self, key: Key) -> Option<&str> {
        match key {
            Key::HearedData => self.heared_data.as_deref(),
            Key::Command => self.command.as_deref(),
            Key::OllamaAnswer => self.ollama_answer.as_deref(),
        }
    }

    fn slot_mut(&mut self, key: Key) -> &mut Option<String> {
        match key {
            Key::HearedData => &mut self.heared_data,
            Key::Command => &mut self.command,
            Key::OllamaAnswer => &mut self.ollama_answer,
        }
    }
}

/// Direction of an access to the turn data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => f.write_str("input"),
            Access::Write => f.write_str("output"),
        }
    }
}

/// Errors raised when a state breaks its data contract
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("`{key}` is not a declared {access} of this state")]
    Undeclared { key: Key, access: Access },

    #[error("`{0}` was read before any state wrote it")]
    Unset(Key),
}

/// A state's window onto the turn data
pub struct Userdata<'a> {
    data: &'a mut TurnData,
    inputs: &'a [Key],
    outputs: &'a [Key],
}

impl<'a> Userdata<'a> {
    pub(crate) fn new(data: &'a mut TurnData, inputs: &'a [Key], outputs: &'a [Key]) -> Self {
        Self {
            data,
            inputs,
            outputs,
        }
    }

    /// Read a declared input
    pub fn get(&self, key: Key) -> Result<&str, DataError> {
        if !self.inputs.contains(&key) {
            return Err(DataError::Undeclared {
                key,
                access: Access::Read,
            });
        }
        self.data.get(key).ok_or(DataError::Unset(key))
    }

    /// Write a declared output
    pub fn set(&mut self, key: Key, value: impl Into<String>) -> Result<(), DataError> {
        if !self.outputs.contains(&key) {
            return Err(DataError::Undeclared {
                key,
                access: Access::Write,
            });
        }
        *self.data.slot_mut(key) = Some(value.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_keys_round_through_view() {
        let mut data = TurnData::default();
        {
            let mut view = Userdata::new(&mut data, &[], &[Key::HearedData]);
            view.set(Key::HearedData, "turn left").unwrap();
        }
        let view = Userdata::new(&mut data, &[Key::HearedData], &[]);
        assert_eq!(view.get(Key::HearedData).unwrap(), "turn left");
    }

    #[test]
    fn test_undeclared_read_is_rejected() {
        let mut data = TurnData {
            command: Some("MOVE:LEFT".into()),
            ..TurnData::default()
        };
        let view = Userdata::new(&mut data, &[Key::HearedData], &[]);
        assert!(matches!(
            view.get(Key::Command),
            Err(DataError::Undeclared {
                key: Key::Command,
                access: Access::Read
            })
        ));
    }

    #[test]
    fn test_undeclared_write_leaves_data_untouched() {
        let mut data = TurnData::default();
        {
            let mut view = Userdata::new(&mut data, &[], &[Key::Command]);
            assert!(view.set(Key::OllamaAnswer, "hi").is_err());
        }
        assert_eq!(data, TurnData::default());
    }

    #[test]
    fn test_unset_input_is_reported() {
        let mut data = TurnData::default();
        let view = Userdata::new(&mut data, &[Key::Command], &[]);
        assert!(matches!(view.get(Key::Command), Err(DataError::Unset(Key::Command))));
    }

    #[test]
    fn test_key_names() {
        let names: Vec<_> = Key::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["heared_data", "command", "ollama_answer"]);
    }
}
