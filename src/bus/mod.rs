//! Message channel module
//!
//! Named topics carrying string payloads. States get the channel injected
//! as an `Arc<dyn MessageChannel>` at construction.

mod local;

pub use local::LocalBus;

use std::sync::Arc;

use tracing::debug;

/// Callback invoked with the payload of every message on a subscribed topic
pub type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle identifying one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Errors raised by a message channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("message channel is closed")]
    Closed,
}

/// Publish/subscribe substrate shared by every state
pub trait MessageChannel: Send + Sync {
    /// Deliver `data` to every subscriber of `topic`
    fn publish(&self, topic: &str, data: &str) -> Result<(), ChannelError>;

    /// Register a callback on `topic`
    fn subscribe(&self, topic: &str, callback: Callback) -> Result<SubscriptionId, ChannelError>;

    /// Remove a callback. Returns false if it was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// A live subscription that is removed from its channel when dropped
pub struct Subscription {
    channel: Arc<dyn MessageChannel>,
    topic: String,
    id: SubscriptionId,
}

impl Subscription {
    /// Subscribe `callback` to `topic` on `channel`
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        topic: &str,
        callback: Callback,
    ) -> Result<Self, ChannelError> {
        let id = channel.subscribe(topic, callback)?;
        debug!(topic, ?id, "subscribed");
        Ok(Self {
            channel,
            topic: topic.to_owned(),
            id,
        })
    }

    /// Topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the subscription now instead of at end of scope
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.channel.unsubscribe(self.id) {
            debug!(topic = %self.topic, id = ?self.id, "unsubscribed");
        }
    }
}
