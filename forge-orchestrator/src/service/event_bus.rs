//! Event Bus
//!
//! Ephemeral publish/subscribe channel keyed by pipeline id. Each key keeps a
//! broadcast channel for live viewers and a replay buffer so late subscribers
//! still see earlier events.
//!
//! Publishing never waits on subscribers: a slow subscriber falls behind the
//! broadcast capacity and is told how many events it missed.

use forge_core::domain::log::LogEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Live events buffered per subscriber before it starts lagging
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default replay window
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

struct Topic {
    sender: broadcast::Sender<LogEvent>,
    history: VecDeque<(Instant, LogEvent)>,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: VecDeque::new(),
        }
    }
}

/// A subscription: replay of everything buffered, then the live feed
pub struct Subscription {
    pub history: Vec<LogEvent>,
    pub receiver: broadcast::Receiver<LogEvent>,
}

pub struct EventBus {
    topics: Mutex<HashMap<Uuid, Topic>>,
    retention: Duration,
    capacity: usize,
}

impl EventBus {
    pub fn new(retention: Duration) -> Self {
        Self::with_capacity(retention, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(retention: Duration, capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            retention,
            capacity: capacity.max(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<Uuid, Topic>> {
        // Topics hold no invariants a panicking holder could break half-way
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish an event to everyone watching its pipeline
    ///
    /// Returns the number of live subscribers that received it.
    pub fn publish(&self, event: LogEvent) -> usize {
        let mut topics = self.topics();
        let capacity = self.capacity;
        let topic = topics
            .entry(event.pipeline_id)
            .or_insert_with(|| Topic::new(capacity));

        topic.history.push_back((Instant::now(), event.clone()));

        match topic.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(
                    pipeline_id = %event.pipeline_id,
                    phase = %event.phase,
                    "No live subscribers, event buffered only"
                );
                0
            }
        }
    }

    /// Subscribe to a pipeline's events
    ///
    /// History and receiver are taken under the same lock, so every event
    /// shows up exactly once across the two.
    pub fn subscribe(&self, pipeline_id: Uuid) -> Subscription {
        let mut topics = self.topics();
        let capacity = self.capacity;
        let topic = topics
            .entry(pipeline_id)
            .or_insert_with(|| Topic::new(capacity));

        Subscription {
            history: self.retained(topic),
            receiver: topic.sender.subscribe(),
        }
    }

    /// Buffered events for a pipeline, in publish order
    pub fn history(&self, pipeline_id: Uuid) -> Vec<LogEvent> {
        self.topics()
            .get(&pipeline_id)
            .map(|topic| self.retained(topic))
            .unwrap_or_default()
    }

    fn retained(&self, topic: &Topic) -> Vec<LogEvent> {
        topic
            .history
            .iter()
            .filter(|(at, _)| at.elapsed() < self.retention)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Drop expired events and topics nobody is watching any more
    ///
    /// Returns the number of events dropped.
    pub fn prune(&self) -> usize {
        let mut topics = self.topics();
        let mut dropped = 0;

        topics.retain(|_, topic| {
            while let Some((at, _)) = topic.history.front() {
                if at.elapsed() < self.retention {
                    break;
                }
                topic.history.pop_front();
                dropped += 1;
            }
            !topic.history.is_empty() || topic.sender.receiver_count() > 0
        });

        dropped
    }

    /// Number of pipelines with buffered events or live subscribers
    pub fn topic_count(&self) -> usize {
        self.topics().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
