//! Canonical turn machine layouts
//!
//! Every layout starts in HEAR. Silence either loops back into HEAR or ends
//! the turn with `timeout`, depending on [`TimeoutPolicy`]. Interpreter
//! failures end the turn with `failed`.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::bus::MessageChannel;
use crate::config::{Config, TimeoutPolicy, Wiring};
use crate::events::TurnEvent;
use crate::interpreter::CommandInterpreter;
use crate::machine::{Key, MachineError, TurnMachine};
use crate::states::{
    HearState, InterpretState, SpeakState, FAILED, HEARD, SUCCEEDED, TIMEOUT,
};

pub const HEAR: &str = "HEAR";
pub const COMMANDS: &str = "COMMANDS";
pub const CONVERSATION: &str = "CONVERSATION";
pub const SPEECH: &str = "SPEECH";

/// Terminal outcomes of every layout
pub const OUTCOMES: [&str; 3] = [SUCCEEDED, TIMEOUT, FAILED];

/// Build the machine selected by `config.wiring`
pub fn build(
    config: &Config,
    channel: Arc<dyn MessageChannel>,
    interpreter: Arc<dyn CommandInterpreter>,
    event_tx: broadcast::Sender<TurnEvent>,
) -> Result<TurnMachine, MachineError> {
    let on_timeout = match config.on_timeout {
        TimeoutPolicy::Retry => HEAR,
        TimeoutPolicy::Terminate => TIMEOUT,
    };

    let hear = HearState::new(
        Arc::clone(&channel),
        config.inbound_topic.as_str(),
        config.hear_timeout,
    );

    let builder = TurnMachine::builder(&OUTCOMES).events(event_tx);

    let builder = match config.wiring {
        Wiring::Greeting => builder
            .add(HEAR, hear, &[(HEARD, SPEECH), (TIMEOUT, on_timeout)])
            .add(
                SPEECH,
                SpeakState::fixed(
                    channel,
                    config.outbound_topic.as_str(),
                    config.greeting.as_str(),
                    config.settle_delay,
                ),
                &[(SUCCEEDED, SUCCEEDED)],
            ),

        Wiring::Command => builder
            .add(HEAR, hear, &[(HEARD, COMMANDS), (TIMEOUT, on_timeout)])
            .add(
                COMMANDS,
                InterpretState::new(interpreter, Key::HearedData, Key::Command),
                &[(SUCCEEDED, SPEECH), (FAILED, FAILED)],
            )
            .add(
                SPEECH,
                SpeakState::from_key(
                    channel,
                    config.outbound_topic.as_str(),
                    Key::Command,
                    config.settle_delay,
                ),
                &[(SUCCEEDED, SUCCEEDED)],
            ),

        Wiring::Conversation => builder
            .add(HEAR, hear, &[(HEARD, COMMANDS), (TIMEOUT, on_timeout)])
            .add(
                COMMANDS,
                InterpretState::new(Arc::clone(&interpreter), Key::HearedData, Key::Command),
                &[(SUCCEEDED, CONVERSATION), (FAILED, FAILED)],
            )
            .add(
                CONVERSATION,
                InterpretState::new(interpreter, Key::Command, Key::OllamaAnswer),
                &[(SUCCEEDED, SPEECH), (FAILED, FAILED)],
            )
            .add(
                SPEECH,
                SpeakState::from_key(
                    channel,
                    config.outbound_topic.as_str(),
                    Key::OllamaAnswer,
                    config.settle_delay,
                ),
                &[(SUCCEEDED, SUCCEEDED)],
            ),
    };

    builder.initial(HEAR).build()
}
