//! Waits for a recognized utterance on the inbound topic

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{MessageChannel, Subscription};
use crate::machine::{Key, StateError, TurnState, Userdata};

/// Outcome when an utterance arrived before the deadline
pub const HEARD: &str = "heard";
/// Outcome when the deadline passed in silence
pub const TIMEOUT: &str = "timeout";

/// Listens on the inbound topic for at most `timeout`
pub struct HearState {
    channel: Arc<dyn MessageChannel>,
    topic: String,
    timeout: Duration,
}

impl HearState {
    pub fn new(channel: Arc<dyn MessageChannel>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            channel,
            topic: topic.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TurnState for HearState {
    fn outcomes(&self) -> &[&'static str] {
        &[HEARD, TIMEOUT]
    }

    fn output_keys(&self) -> &[Key] {
        &[Key::HearedData]
    }

    fn writes_on(&self, outcome: &str) -> &[Key] {
        if outcome == HEARD {
            &[Key::HearedData]
        } else {
            &[]
        }
    }

    async fn execute(
        &self,
        data: &mut Userdata<'_>,
        cancel: &CancellationToken,
    ) -> Result<&'static str, StateError> {
        info!(
            topic = %self.topic,
            timeout_ms = self.timeout.as_millis() as u64,
            "waiting for utterance"
        );

        let (slot_tx, mut slot_rx) = watch::channel(None::<String>);
        let subscription = Subscription::new(
            Arc::clone(&self.channel),
            &self.topic,
            Arc::new(move |payload: &str| {
                slot_tx.send_replace(Some(payload.to_owned()));
            }),
        )?;

        let deadline = Instant::now() + self.timeout;

        let heard = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(topic = %self.topic, "stopped listening: shutdown requested");
                return Err(StateError::Cancelled);
            }
            heard = wait_for_utterance(&mut slot_rx, deadline) => heard,
        };

        subscription.unsubscribe();

        match heard {
            Some(utterance) => {
                info!(%utterance, "utterance heard");
                data.set(Key::HearedData, utterance)?;
                Ok(HEARD)
            }
            None => {
                info!(topic = %self.topic, "no utterance before deadline");
                Ok(TIMEOUT)
            }
        }
    }
}

/// Wait until the slot is filled or `deadline` passes. A payload delivered
/// by the time the deadline fires still counts.
async fn wait_for_utterance(
    slot_rx: &mut watch::Receiver<Option<String>>,
    deadline: Instant,
) -> Option<String> {
    let heard = match tokio::time::timeout_at(deadline, slot_rx.wait_for(Option::is_some)).await {
        Ok(Ok(slot)) => slot.clone(),
        _ => None,
    };

    heard.or_else(|| slot_rx.borrow().clone())
}
