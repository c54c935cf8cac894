//! # In-process transport.
//!
//! [`MemoryTransport`] implements the full [`Transport`] contract inside the
//! process. It is used by the test-suite and the demo, and is handy for local
//! development without a managed pub/sub service.
//!
//! ## Model
//! ```text
//! MemoryTopic::publish_async ──► publisher tracker (buffered) ──► Shared::deliver
//!                                                                   │
//!                                            ┌──────────────────────┼──────────────┐
//!                                            ▼                      ▼              ▼
//!                                     [queue sub A]          [queue sub B]   topic log
//!                                            │
//!                  pull ──► lease (ack deadline) ──► ack: gone
//!                                                 ├─► nack: front of queue (attempt + 1)
//!                                                 ├─► modack: lease extended
//!                                                 └─► lease expired: front of queue
//! ```
//!
//! ## Rules
//! - Subscription names are global; a subscription is bound to one topic.
//! - Delivery attempts are reported on messages only when a dead-letter policy
//!   is set (mirrors managed services).
//! - Once `attempts >= max_delivery_attempts`, a redelivery is routed to the
//!   dead-letter topic instead.
//! - With message ordering enabled on the topic, at most one message per
//!   ordering key is outstanding at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use super::{
    Acknowledge, Attributes, DeadLetterPolicy, Message, PublishHandle, PublishResult, RetryPolicy,
    Subscription, SubscriptionRef, Topic, TopicRef, Transport,
};
use crate::error::TransportError;

/// How long one `pull` waits for messages before returning an empty batch.
const PULL_WAIT: Duration = Duration::from_millis(50);

/// A message as recorded on a topic's publish log.
#[derive(Clone, Debug)]
pub struct PublishedMessage {
    pub id: String,
    pub data: Bytes,
    pub attributes: Attributes,
    pub ordering_key: Option<String>,
    pub publish_time: SystemTime,
}

/// Counters and queue sizes of one subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub delivered: usize,
    pub acked: usize,
    pub nacked: usize,
    pub deadline_extensions: Vec<Duration>,
    pub dead_lettered: usize,
    pub pending: usize,
    pub outstanding: usize,
    pub policy_updates: usize,
}

#[derive(Clone, Debug)]
struct Stored {
    published: PublishedMessage,
    ordered: bool,
    attempts: u32,
}

struct Lease {
    stored: Stored,
    expires: Instant,
}

#[derive(Default)]
struct Shared {
    topics: Mutex<HashMap<String, Arc<MemoryTopic>>>,
    subscriptions: Mutex<HashMap<String, Arc<MemorySubscription>>>,
    topic_creations: AtomicUsize,
    subscription_creations: AtomicUsize,
    next_id: AtomicU64,
    fail_publishes: AtomicBool,
}

impl Shared {
    /// Records the message on the topic log and fans it out to bound subscriptions.
    fn deliver(
        &self,
        topic: &str,
        data: Bytes,
        attributes: Attributes,
        ordering_key: Option<String>,
    ) -> PublishResult {
        if self.fail_publishes.load(Ordering::Relaxed) {
            return Err(TransportError::Rejected("publishing disabled".into()));
        }
        let Some(target) = self.topics.lock().get(topic).cloned() else {
            return Err(TransportError::NotFound(topic.to_string()));
        };

        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let ordered = target.message_ordering() && ordering_key.is_some();
        let published = PublishedMessage {
            id: id.clone(),
            data,
            attributes,
            ordering_key,
            publish_time: SystemTime::now(),
        };
        target.log.lock().push(published.clone());

        let bound: Vec<Arc<MemorySubscription>> = self
            .subscriptions
            .lock()
            .values()
            .filter(|s| s.topic_name == topic)
            .cloned()
            .collect();
        for sub in bound {
            sub.enqueue(Stored {
                published: published.clone(),
                ordered,
                attempts: 0,
            });
        }
        Ok(id)
    }
}

/// In-process pub/sub transport.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a topic out of band (not counted by [`Self::topic_creations`]).
    pub fn seed_topic(&self, name: &str) -> Arc<MemoryTopic> {
        self.shared
            .topics
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| MemoryTopic::new(name, Arc::downgrade(&self.shared)))
            .clone()
    }

    /// Creates a subscription (and its topic) out of band.
    pub fn seed_subscription(&self, topic: &str, name: &str) -> Arc<MemorySubscription> {
        self.seed_topic(topic);
        self.shared
            .subscriptions
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| MemorySubscription::new(name, topic, Arc::downgrade(&self.shared)))
            .clone()
    }

    /// Number of successful `create_topic` calls.
    pub fn topic_creations(&self) -> usize {
        self.shared.topic_creations.load(Ordering::Relaxed)
    }

    /// Number of successful `create_subscription` calls.
    pub fn subscription_creations(&self) -> usize {
        self.shared.subscription_creations.load(Ordering::Relaxed)
    }

    pub fn topic(&self, name: &str) -> Option<Arc<MemoryTopic>> {
        self.shared.topics.lock().get(name).cloned()
    }

    pub fn subscription(&self, name: &str) -> Option<Arc<MemorySubscription>> {
        self.shared.subscriptions.lock().get(name).cloned()
    }

    /// Everything published to `topic` so far, in publish order.
    pub fn published(&self, topic: &str) -> Vec<PublishedMessage> {
        self.topic(topic).map(|t| t.published()).unwrap_or_default()
    }

    pub fn subscription_stats(&self, name: &str) -> Option<SubscriptionStats> {
        self.subscription(name).map(|s| s.stats())
    }

    /// Makes every subsequent publish fail with [`TransportError::Rejected`].
    pub fn fail_publishes(&self, fail: bool) {
        self.shared.fail_publishes.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn find_topic(&self, name: &str) -> Result<Option<TopicRef>, TransportError> {
        Ok(self.topic(name).map(|t| t as TopicRef))
    }

    async fn create_topic(&self, name: &str) -> Result<TopicRef, TransportError> {
        let mut topics = self.shared.topics.lock();
        if topics.contains_key(name) {
            return Err(TransportError::AlreadyExists(name.to_string()));
        }
        let topic = MemoryTopic::new(name, Arc::downgrade(&self.shared));
        topics.insert(name.to_string(), Arc::clone(&topic));
        self.shared.topic_creations.fetch_add(1, Ordering::Relaxed);
        Ok(topic)
    }
}

/// Topic of a [`MemoryTransport`].
pub struct MemoryTopic {
    name: String,
    shared: Weak<Shared>,
    ordering: AtomicBool,
    publisher: TaskTracker,
    log: Mutex<Vec<PublishedMessage>>,
}

impl MemoryTopic {
    fn new(name: &str, shared: Weak<Shared>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            shared,
            ordering: AtomicBool::new(false),
            publisher: TaskTracker::new(),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Everything published to this topic so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.log.lock().clone()
    }

    /// Publishes still buffered (not yet sent).
    pub fn buffered(&self) -> usize {
        self.publisher.len()
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish_async(
        &self,
        data: Bytes,
        attributes: Attributes,
        ordering_key: Option<String>,
    ) -> PublishHandle {
        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        let topic = self.name.clone();

        self.publisher.spawn(async move {
            tokio::task::yield_now().await;
            let res = match shared.upgrade() {
                Some(shared) => shared.deliver(&topic, data, attributes, ordering_key),
                None => Err(TransportError::Closed),
            };
            let _ = tx.send(res);
        });

        Box::pin(async move { rx.await.unwrap_or(Err(TransportError::Closed)) })
    }

    fn enable_message_ordering(&self) {
        self.ordering.store(true, Ordering::Relaxed);
    }

    fn message_ordering(&self) -> bool {
        self.ordering.load(Ordering::Relaxed)
    }

    async fn flush(&self) {
        self.publisher.close();
        self.publisher.wait().await;
        self.publisher.reopen();
    }

    async fn find_subscription(&self, name: &str) -> Result<Option<SubscriptionRef>, TransportError> {
        let shared = self.shared.upgrade().ok_or(TransportError::Closed)?;
        let found = shared.subscriptions.lock().get(name).cloned();
        Ok(found.map(|s| s as SubscriptionRef))
    }

    async fn create_subscription(&self, name: &str) -> Result<SubscriptionRef, TransportError> {
        let shared = self.shared.upgrade().ok_or(TransportError::Closed)?;
        let mut subs = shared.subscriptions.lock();
        if subs.contains_key(name) {
            return Err(TransportError::AlreadyExists(name.to_string()));
        }
        let sub = MemorySubscription::new(name, &self.name, self.shared.clone());
        subs.insert(name.to_string(), Arc::clone(&sub));
        shared.subscription_creations.fetch_add(1, Ordering::Relaxed);
        Ok(sub)
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Stored>,
    outstanding: HashMap<String, Lease>,
    next_ack: u64,
    stats: SubscriptionStats,
}

/// Subscription of a [`MemoryTransport`].
pub struct MemorySubscription {
    name: String,
    topic_name: String,
    shared: Weak<Shared>,
    me: Weak<MemorySubscription>,
    state: Mutex<QueueState>,
    notify: Notify,
    retry_policy: Mutex<Option<RetryPolicy>>,
    dead_letter: Mutex<Option<DeadLetterPolicy>>,
    policy_updates: AtomicUsize,
}

impl MemorySubscription {
    fn new(name: &str, topic: &str, shared: Weak<Shared>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_string(),
            topic_name: topic.to_string(),
            shared,
            me: me.clone(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            retry_policy: Mutex::new(None),
            dead_letter: Mutex::new(None),
            policy_updates: AtomicUsize::new(0),
        })
    }

    pub fn stats(&self) -> SubscriptionStats {
        let st = self.state.lock();
        let mut stats = st.stats.clone();
        stats.pending = st.queue.len();
        stats.outstanding = st.outstanding.len();
        stats.policy_updates = self.policy_updates.load(Ordering::Relaxed);
        stats
    }

    fn enqueue(&self, stored: Stored) {
        self.state.lock().queue.push_back(stored);
        self.notify.notify_waiters();
    }

    /// Puts a message back in front of the queue, or collects it for the
    /// dead-letter topic once its attempts are used up.
    fn requeue(
        st: &mut QueueState,
        stored: Stored,
        dead_letter: Option<&DeadLetterPolicy>,
        forwards: &mut Vec<(String, PublishedMessage)>,
    ) {
        match dead_letter {
            Some(policy) if stored.attempts >= policy.max_delivery_attempts => {
                st.stats.dead_lettered += 1;
                forwards.push((policy.topic.clone(), stored.published));
            }
            _ => st.queue.push_front(stored),
        }
    }

    fn forward(&self, forwards: Vec<(String, PublishedMessage)>) {
        if forwards.is_empty() {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            for (topic, msg) in forwards {
                let _ = shared.deliver(&topic, msg.data, msg.attributes, msg.ordering_key);
            }
        }
    }

    fn take_batch(&self, max: usize, ack_deadline: Duration) -> Vec<Message> {
        let now = Instant::now();
        let dead_letter = self.dead_letter.lock().clone();
        let mut forwards = Vec::new();
        let mut batch = Vec::new();

        {
            let mut guard = self.state.lock();
            let st = &mut *guard;

            let expired: Vec<String> = st
                .outstanding
                .iter()
                .filter(|(_, lease)| lease.expires <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for ack_id in expired {
                if let Some(lease) = st.outstanding.remove(&ack_id) {
                    Self::requeue(st, lease.stored, dead_letter.as_ref(), &mut forwards);
                }
            }

            let mut busy_keys: HashSet<String> = st
                .outstanding
                .values()
                .filter(|lease| lease.stored.ordered)
                .filter_map(|lease| lease.stored.published.ordering_key.clone())
                .collect();

            let mut i = 0;
            while batch.len() < max && i < st.queue.len() {
                let blocked = {
                    let candidate = &st.queue[i];
                    candidate.ordered
                        && candidate
                            .published
                            .ordering_key
                            .as_ref()
                            .is_some_and(|k| busy_keys.contains(k))
                };
                if blocked {
                    i += 1;
                    continue;
                }
                let Some(mut stored) = st.queue.remove(i) else {
                    break;
                };
                stored.attempts += 1;
                if stored.ordered {
                    if let Some(key) = &stored.published.ordering_key {
                        busy_keys.insert(key.clone());
                    }
                }

                st.next_ack += 1;
                let ack_id = format!("{}:{}", self.name, st.next_ack);
                st.stats.delivered += 1;
                batch.push(self.to_message(&stored, &ack_id, dead_letter.is_some()));
                st.outstanding.insert(
                    ack_id,
                    Lease {
                        stored,
                        expires: now + ack_deadline,
                    },
                );
            }
        }

        self.forward(forwards);
        batch
    }

    fn to_message(&self, stored: &Stored, ack_id: &str, report_attempts: bool) -> Message {
        let acker: Arc<dyn Acknowledge> = Arc::new(MemoryAcker {
            sub: self.me.clone(),
        });
        let p = &stored.published;
        let mut msg = Message::new(
            p.id.as_str(),
            p.data.clone(),
            p.attributes.clone(),
            ack_id,
            acker,
        )
        .with_publish_time(p.publish_time);
        if let Some(key) = &p.ordering_key {
            msg = msg.with_ordering_key(key.as_str());
        }
        if report_attempts {
            msg = msg.with_delivery_attempt(stored.attempts);
        }
        msg
    }

    fn ack(&self, ack_id: &str) -> Result<(), TransportError> {
        let mut st = self.state.lock();
        match st.outstanding.remove(ack_id) {
            Some(_) => {
                st.stats.acked += 1;
                drop(st);
                // an ordered key may have been unblocked
                self.notify.notify_waiters();
                Ok(())
            }
            None => Err(TransportError::NotFound(ack_id.to_string())),
        }
    }

    fn nack(&self, ack_id: &str) -> Result<(), TransportError> {
        let dead_letter = self.dead_letter.lock().clone();
        let mut forwards = Vec::new();
        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let lease = st
                .outstanding
                .remove(ack_id)
                .ok_or_else(|| TransportError::NotFound(ack_id.to_string()))?;
            st.stats.nacked += 1;
            Self::requeue(st, lease.stored, dead_letter.as_ref(), &mut forwards);
        }
        self.forward(forwards);
        self.notify.notify_waiters();
        Ok(())
    }

    fn modify(&self, ack_id: &str, deadline: Duration) -> Result<(), TransportError> {
        if deadline.is_zero() {
            return self.nack(ack_id);
        }
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let lease = st
            .outstanding
            .get_mut(ack_id)
            .ok_or_else(|| TransportError::NotFound(ack_id.to_string()))?;
        lease.expires = Instant::now() + deadline;
        st.stats.deadline_extensions.push(deadline);
        Ok(())
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn name(&self) -> &str {
        &self.name
    }

    fn topic_name(&self) -> &str {
        &self.topic_name
    }

    async fn pull(
        &self,
        max_messages: usize,
        ack_deadline: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        let max = max_messages.max(1);
        let give_up = Instant::now() + PULL_WAIT;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take_batch(max, ack_deadline);
            if !batch.is_empty() {
                return Ok(batch);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(give_up) => return Ok(Vec::new()),
            }
        }
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        *self.retry_policy.lock()
    }

    async fn set_retry_policy(&self, policy: Option<RetryPolicy>) -> Result<(), TransportError> {
        *self.retry_policy.lock() = policy;
        self.policy_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn dead_letter_policy(&self) -> Option<DeadLetterPolicy> {
        self.dead_letter.lock().clone()
    }

    async fn set_dead_letter_policy(
        &self,
        policy: Option<DeadLetterPolicy>,
    ) -> Result<(), TransportError> {
        *self.dead_letter.lock() = policy;
        self.policy_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Routes message dispositions back to the owning subscription.
struct MemoryAcker {
    sub: Weak<MemorySubscription>,
}

impl MemoryAcker {
    fn sub(&self) -> Result<Arc<MemorySubscription>, TransportError> {
        self.sub.upgrade().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self, ack_id: &str) -> Result<(), TransportError> {
        self.sub()?.ack(ack_id)
    }

    async fn nack(&self, ack_id: &str) -> Result<(), TransportError> {
        self.sub()?.nack(ack_id)
    }

    async fn modify_ack_deadline(
        &self,
        ack_id: &str,
        deadline: Duration,
    ) -> Result<(), TransportError> {
        self.sub()?.modify(ack_id, deadline)
    }
}
