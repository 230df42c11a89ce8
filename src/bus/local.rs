//! In-process message bus
//!
//! Callbacks run synchronously on the publisher's task. The registry lock
//! is never held while a callback runs, so callbacks may publish or
//! unsubscribe themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use super::{Callback, ChannelError, MessageChannel, SubscriptionId};

/// Topic-keyed callback registry
#[derive(Default)]
struct Registry {
    topics: HashMap<String, Vec<(SubscriptionId, Callback)>>,
}

/// Message bus living inside the daemon process
pub struct LocalBus {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl LocalBus {
    /// Create an empty, open bus
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of callbacks currently registered on `topic`
    #[cfg(test)]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry()
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Close the bus. Later publishes and subscribes fail with
    /// [`ChannelError::Closed`]; registered callbacks are dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.registry().topics.clear();
            info!("message bus closed");
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageChannel for LocalBus {
    fn publish(&self, topic: &str, data: &str) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let callbacks: Vec<Callback> = self
            .registry()
            .topics
            .get(topic)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        debug!(topic, subscribers = callbacks.len(), "publishing message");

        for callback in callbacks {
            callback(data);
        }

        Ok(())
    }

    fn subscribe(&self, topic: &str, callback: Callback) -> Result<SubscriptionId, ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry()
            .topics
            .entry(topic.to_owned())
            .or_default()
            .push((id, callback));

        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let mut removed = false;

        registry.topics.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|(sub_id, _)| *sub_id != id);
            removed |= subs.len() != before;
            !subs.is_empty()
        });

        removed
    }
}
