//! Topic → subscriber fan-out.
//!
//! ```text
//! "doc-42" ──► [cb#1, cb#4]
//! "doc-7"  ──► [cb#2]
//! "global" ──► [cb#3]
//! ```
//!
//! A topic key exists only while it has at least one subscriber; removing
//! the last callback drops the key so long-lived clients do not accumulate
//! stale topics as documents come and go.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::Envelope;

/// Subscriber callback.
pub type EventCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Registry-unique subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Result of one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Callbacks that returned normally
    pub delivered: usize,
    /// Callbacks that panicked
    pub failed: usize,
}

#[derive(Default)]
struct Topics {
    by_topic: HashMap<String, Vec<(SubscriberId, EventCallback)>>,
    next_id: u64,
}

/// Per-topic subscriber sets.
#[derive(Default)]
pub struct SubscriberRegistry {
    topics: Mutex<Topics>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> MutexGuard<'_, Topics> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for `topic`, creating the topic on first use.
    pub fn add(&self, topic: &str, callback: EventCallback) -> SubscriberId {
        let mut topics = self.topics();
        topics.next_id += 1;
        let id = SubscriberId(topics.next_id);
        topics
            .by_topic
            .entry(topic.to_owned())
            .or_default()
            .push((id, callback));
        log::debug!("Subscriber {} added to topic {topic}", id.0);
        id
    }

    /// Remove one subscriber. Returns `false` if it was already gone.
    pub fn remove(&self, topic: &str, id: SubscriberId) -> bool {
        let mut topics = self.topics();
        let Some(subscribers) = topics.by_topic.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            topics.by_topic.remove(topic);
            log::debug!("Topic {topic} has no subscribers left, dropped");
        }
        removed
    }

    /// Deliver `envelope` to every subscriber of `topic`, in registration
    /// order. Unknown topics are a silent no-op. A panicking callback is
    /// logged and skipped; the rest still run.
    pub fn dispatch(&self, topic: &str, envelope: &Envelope) -> DispatchOutcome {
        // Snapshot so callbacks run without the lock held; they may
        // subscribe or unsubscribe from inside the callback.
        let subscribers: Vec<EventCallback> = match self.topics().by_topic.get(topic) {
            Some(subs) => subs.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return DispatchOutcome::default(),
        };

        let mut outcome = DispatchOutcome::default();
        for callback in subscribers {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(envelope))) {
                Ok(()) => outcome.delivered += 1,
                Err(_) => {
                    outcome.failed += 1;
                    log::warn!(
                        "Subscriber callback panicked on {} event for topic {topic}",
                        envelope.event_type
                    );
                }
            }
        }
        outcome
    }

    /// Whether any topic has a subscriber.
    pub fn has_any(&self) -> bool {
        !self.topics().by_topic.is_empty()
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics().by_topic.contains_key(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.topics().by_topic.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.topics().by_topic.values().map(Vec::len).sum()
    }

    /// Drop every subscriber and topic.
    pub fn clear(&self) {
        self.topics().by_topic.clear();
    }
}
