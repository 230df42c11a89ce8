//! Hands the heard utterance to the command interpreter

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{FAILED, SUCCEEDED};
use crate::interpreter::CommandInterpreter;
use crate::machine::{Key, StateError, TurnState, Userdata};

/// Reads one key, interprets it, writes the answer to another key
pub struct InterpretState {
    interpreter: Arc<dyn CommandInterpreter>,
    input: [Key; 1],
    output: [Key; 1],
}

impl InterpretState {
    pub fn new(interpreter: Arc<dyn CommandInterpreter>, input: Key, output: Key) -> Self {
        Self {
            interpreter,
            input: [input],
            output: [output],
        }
    }
}

#[async_trait]
impl TurnState for InterpretState {
    fn outcomes(&self) -> &[&'static str] {
        &[SUCCEEDED, FAILED]
    }

    fn input_keys(&self) -> &[Key] {
        &self.input
    }

    fn output_keys(&self) -> &[Key] {
        &self.output
    }

    fn writes_on(&self, outcome: &str) -> &[Key] {
        if outcome == SUCCEEDED {
            &self.output
        } else {
            &[]
        }
    }

    async fn execute(
        &self,
        data: &mut Userdata<'_>,
        _cancel: &CancellationToken,
    ) -> Result<&'static str, StateError> {
        let [input] = self.input;
        let [output] = self.output;
        let query = data.get(input)?.to_owned();

        info!(%query, from = %input, "interpreting");

        match self.interpreter.process(&query).await {
            Ok(answer) => {
                info!(%answer, to = %output, "interpreter answered");
                data.set(output, answer)?;
                Ok(SUCCEEDED)
            }
            Err(e) => {
                warn!(error = %e, %query, "interpreter failed");
                Ok(FAILED)
            }
        }
    }
}
