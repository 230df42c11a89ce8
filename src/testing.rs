//! Test doubles for the message channel and the command interpreter

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{Callback, ChannelError, LocalBus, MessageChannel, SubscriptionId};
use crate::interpreter::{CommandInterpreter, InterpretError};

/// Local bus that counts subscriptions and records every publish
pub struct CountingChannel {
    inner: LocalBus,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    published: Mutex<Vec<(String, String)>>,
}

impl CountingChannel {
    pub fn new() -> Self {
        Self {
            inner: LocalBus::new(),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &LocalBus {
        &self.inner
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// `(topic, data)` pairs in publish order
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

impl MessageChannel for CountingChannel {
    fn publish(&self, topic: &str, data: &str) -> Result<(), ChannelError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), data.to_owned()));
        self.inner.publish(topic, data)
    }

    fn subscribe(&self, topic: &str, callback: Callback) -> Result<SubscriptionId, ChannelError> {
        let id = self.inner.subscribe(topic, callback)?;
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.unsubscribe(id);
        if removed {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }
}

/// Interpreter answering from a fixed table; unknown queries fail
pub struct StubInterpreter {
    answers: HashMap<String, String>,
    queries: Mutex<Vec<String>>,
}

impl StubInterpreter {
    pub fn new(answers: &[(&str, &str)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(q, a)| ((*q).to_owned(), (*a).to_owned()))
                .collect(),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Every query received, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandInterpreter for StubInterpreter {
    async fn process(&self, query: &str) -> Result<String, InterpretError> {
        self.queries.lock().unwrap().push(query.to_owned());
        self.answers
            .get(query)
            .cloned()
            .ok_or_else(|| InterpretError::Decode(format!("no stub answer for `{query}`")))
    }
}

/// Forward every message on `topic` into a channel
pub fn capture(channel: &Arc<dyn MessageChannel>, topic: &str) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    channel
        .subscribe(
            topic,
            Arc::new(move |data: &str| {
                let _ = tx.send(data.to_owned());
            }),
        )
        .unwrap();
    rx
}
