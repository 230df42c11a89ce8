//! Publishes text on the outbound speech topic

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::SUCCEEDED;
use crate::bus::MessageChannel;
use crate::machine::{Key, StateError, TurnState, Userdata};

/// What a [`SpeakState`] says
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speech {
    /// Always the same literal
    Fixed(String),
    /// Whatever the turn data holds under this key
    FromKey(Key),
}

/// Publishes one utterance after a settling delay
pub struct SpeakState {
    channel: Arc<dyn MessageChannel>,
    topic: String,
    speech: Speech,
    settle_delay: Duration,
    inputs: Vec<Key>,
}

impl SpeakState {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        topic: impl Into<String>,
        speech: Speech,
        settle_delay: Duration,
    ) -> Self {
        let inputs = match speech {
            Speech::Fixed(_) => Vec::new(),
            Speech::FromKey(key) => vec![key],
        };

        Self {
            channel,
            topic: topic.into(),
            speech,
            settle_delay,
            inputs,
        }
    }

    /// Speak a literal, ignoring the turn data
    pub fn fixed(
        channel: Arc<dyn MessageChannel>,
        topic: impl Into<String>,
        text: impl Into<String>,
        settle_delay: Duration,
    ) -> Self {
        Self::new(channel, topic, Speech::Fixed(text.into()), settle_delay)
    }

    /// Speak the value of `key`
    pub fn from_key(
        channel: Arc<dyn MessageChannel>,
        topic: impl Into<String>,
        key: Key,
        settle_delay: Duration,
    ) -> Self {
        Self::new(channel, topic, Speech::FromKey(key), settle_delay)
    }
}

#[async_trait]
impl TurnState for SpeakState {
    fn outcomes(&self) -> &[&'static str] {
        &[SUCCEEDED]
    }

    fn input_keys(&self) -> &[Key] {
        &self.inputs
    }

    async fn execute(
        &self,
        data: &mut Userdata<'_>,
        _cancel: &CancellationToken,
    ) -> Result<&'static str, StateError> {
        let text = match &self.speech {
            Speech::Fixed(text) => text.clone(),
            Speech::FromKey(key) => data.get(*key)?.to_owned(),
        };

        // Give late-attaching listeners on the outbound topic time to connect
        tokio::time::sleep(self.settle_delay).await;

        info!(topic = %self.topic, %text, "speaking");
        self.channel.publish(&self.topic, &text)?;

        Ok(SUCCEEDED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::TurnData;
    use crate::testing::CountingChannel;
    use tokio::time::Instant;

    async fn speak(state: &SpeakState, data: &mut TurnData) -> Result<&'static str, StateError> {
        let mut view = Userdata::new(data, state.input_keys(), state.output_keys());
        state.execute(&mut view, &CancellationToken::new()).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_text_ignores_turn_data() {
        let channel = Arc::new(CountingChannel::new());
        let state = SpeakState::fixed(
            channel.clone(),
            "say",
            "Hello, this is a test message",
            Duration::from_secs(1),
        );
        let mut data = TurnData {
            heared_data: Some("turn left".into()),
            command: Some("MOVE:LEFT".into()),
            ollama_answer: Some("ok".into()),
        };

        assert_eq!(speak(&state, &mut data).await.unwrap(), SUCCEEDED);
        assert_eq!(
            channel.published(),
            vec![("say".to_owned(), "Hello, this is a test message".to_owned())]
        );
        assert!(state.input_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_text_reads_current_value() {
        let channel = Arc::new(CountingChannel::new());
        let state = SpeakState::from_key(channel.clone(), "say", Key::OllamaAnswer, Duration::from_secs(1));
        let mut data = TurnData {
            ollama_answer: Some("Turning left now".into()),
            ..TurnData::default()
        };

        speak(&state, &mut data).await.unwrap();
        data.ollama_answer = Some("Turning right now".into());
        speak(&state, &mut data).await.unwrap();

        let said: Vec<_> = channel.published().into_iter().map(|(_, text)| text).collect();
        assert_eq!(said, vec!["Turning left now", "Turning right now"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_settle_delay_before_publishing() {
        let channel = Arc::new(CountingChannel::new());
        let state = SpeakState::fixed(channel.clone(), "say", "hi", Duration::from_secs(1));

        let started = Instant::now();
        speak(&state, &mut TurnData::default()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(channel.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_input_publishes_nothing() {
        let channel = Arc::new(CountingChannel::new());
        let state = SpeakState::from_key(channel.clone(), "say", Key::Command, Duration::from_secs(1));

        let result = speak(&state, &mut TurnData::default()).await;

        assert!(matches!(result, Err(StateError::Data(_))));
        assert!(channel.published().is_empty());
    }
}
