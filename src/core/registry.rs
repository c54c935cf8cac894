//! # Topic registry: process-local cache of resolved topics.
//!
//! Resolves an event name to a transport topic at most once per process, even
//! when many broadcasts and subscriptions race for the same name.
//!
//! ## Architecture
//! ```text
//! resolve(name)
//!   └─► entries[name] (OnceCell) ──► get_or_try_init(find_or_create)
//!                                        ├─► Transport::find_topic  → Some: done
//!                                        ├─► auto-create disabled   → TopicNotFound
//!                                        └─► Transport::create_topic
//!                                              └─► AlreadyExists → find_topic again
//! ```
//!
//! ## Rules
//! - Concurrent first resolutions of one name share a single in-flight lookup.
//! - A failed resolution is not cached; the next call retries.
//! - Topics that were published to are remembered so shutdown can flush them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::core::name::EventName;
use crate::error::{Error, TransportError};
use crate::events::{Bus, Event, EventKind};
use crate::transport::{TopicRef, Transport};

/// Cache of resolved topics, keyed by namespaced event name.
pub struct TopicRegistry {
    transport: Arc<dyn Transport>,
    auto_create: bool,
    bus: Bus,
    entries: Mutex<HashMap<String, Arc<OnceCell<TopicRef>>>>,
    published: Mutex<BTreeSet<String>>,
}

impl TopicRegistry {
    pub fn new(transport: Arc<dyn Transport>, auto_create: bool, bus: Bus) -> Self {
        Self {
            transport,
            auto_create,
            bus,
            entries: Mutex::new(HashMap::new()),
            published: Mutex::new(BTreeSet::new()),
        }
    }

    /// Returns the topic for `name`, creating it if allowed.
    pub async fn resolve(&self, name: &EventName) -> Result<TopicRef, Error> {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(name.to_string()).or_default())
        };
        let topic = cell.get_or_try_init(|| self.find_or_create(name)).await?;
        Ok(Arc::clone(topic))
    }

    /// Returns the cached topic without touching the transport.
    pub fn cached(&self, name: &str) -> Option<TopicRef> {
        self.entries
            .lock()
            .get(name)
            .and_then(|cell| cell.get().cloned())
    }

    async fn find_or_create(&self, name: &EventName) -> Result<TopicRef, Error> {
        if let Some(topic) = self.transport.find_topic(name.as_str()).await? {
            debug!(topic = %name, "topic found");
            return Ok(topic);
        }
        if !self.auto_create {
            return Err(Error::TopicNotFound {
                topic: name.to_string(),
            });
        }

        match self.transport.create_topic(name.as_str()).await {
            Ok(topic) => {
                info!(topic = %name, "created topic");
                self.bus
                    .publish(Event::new(EventKind::TopicCreated).with_event_name(name));
                Ok(topic)
            }
            Err(TransportError::AlreadyExists(_)) => self
                .transport
                .find_topic(name.as_str())
                .await?
                .ok_or_else(|| Error::TopicNotFound {
                    topic: name.to_string(),
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remembers that `name` has buffered publishes.
    pub fn mark_published(&self, name: &str) {
        let mut published = self.published.lock();
        if !published.contains(name) {
            published.insert(name.to_string());
        }
    }

    /// Resolved topics that were published to, in name order.
    pub fn published_topics(&self) -> Vec<TopicRef> {
        let names: Vec<String> = self.published.lock().iter().cloned().collect();
        names.iter().filter_map(|n| self.cached(n)).collect()
    }

    /// Names of every resolved topic, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
