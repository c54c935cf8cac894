//! Transport boundary: the minimum contract the delivery pipeline needs from a
//! managed publish/subscribe service.
//!
//! ## Contents
//! - [`Transport`] find/create topics
//! - [`Topic`] asynchronous publish, flush, find/create subscriptions
//! - [`Subscription`] pull messages, retry and dead-letter policies
//! - [`Message`] envelope with ack / nack / ack-deadline calls
//! - [`MemoryTransport`] complete in-process implementation (tests, demos, local runs)
//!
//! ## Wiring
//! ```text
//! Adapter ──► TopicRegistry ──► Transport::find_topic / create_topic
//!    │                               │
//!    │ broadcast                     ▼
//!    └─────────────────────────► Topic::publish_async ──► PublishHandle (fire-and-forget)
//!
//! Listener ──► Topic::find_subscription / create_subscription
//!    └──► Subscription::pull ──► Message ──► Acknowledge (ack / nack / modack)
//! ```

mod memory;
mod message;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

use crate::error::TransportError;

pub use memory::{MemorySubscription, MemoryTopic, MemoryTransport, PublishedMessage, SubscriptionStats};
pub use message::{ATTR_EVENT_NAME, ATTR_ID, ATTR_REQUEST_ID, Acknowledge, Attributes, Message};

#[cfg(test)]
pub(crate) use message::testing;

/// Shared handle to a topic.
pub type TopicRef = Arc<dyn Topic>;
/// Shared handle to a subscription.
pub type SubscriptionRef = Arc<dyn Subscription>;
/// Outcome of one asynchronous publish: the transport message id on success.
pub type PublishResult = Result<String, TransportError>;
/// Future resolving once a buffered publish has been sent or has failed.
pub type PublishHandle = BoxFuture<'static, PublishResult>;

/// Redelivery backoff the transport applies to rejected messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub minimum_backoff: Duration,
    pub maximum_backoff: Duration,
}

/// Where messages go after too many delivery attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    /// Fully namespaced dead-letter topic name.
    pub topic: String,
    /// Delivery attempts after which the message is routed to `topic`.
    pub max_delivery_attempts: u32,
}

/// Entry point of a pub/sub service.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Looks up an existing topic.
    async fn find_topic(&self, name: &str) -> Result<Option<TopicRef>, TransportError>;

    /// Creates a topic. Returns [`TransportError::AlreadyExists`] when another
    /// creator won the race; callers treat that as success and look it up again.
    async fn create_topic(&self, name: &str) -> Result<TopicRef, TransportError>;
}

/// A named publish destination.
#[async_trait]
pub trait Topic: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Buffers a publish and returns immediately.
    ///
    /// The returned handle resolves when the message was sent or failed; callers
    /// may drop it without affecting delivery.
    fn publish_async(
        &self,
        data: Bytes,
        attributes: Attributes,
        ordering_key: Option<String>,
    ) -> PublishHandle;

    /// Enables ordered delivery for messages sharing an ordering key.
    fn enable_message_ordering(&self);

    fn message_ordering(&self) -> bool;

    /// Stops async-publish buffering and waits until every buffered publish has
    /// been sent or failed.
    async fn flush(&self);

    /// Looks up a subscription by its (namespaced) name.
    async fn find_subscription(&self, name: &str) -> Result<Option<SubscriptionRef>, TransportError>;

    /// Creates a subscription bound to this topic.
    async fn create_subscription(&self, name: &str) -> Result<SubscriptionRef, TransportError>;
}

/// A transport-managed queue bound to exactly one topic.
#[async_trait]
pub trait Subscription: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Name of the topic this subscription is bound to.
    fn topic_name(&self) -> &str;

    /// Pulls up to `max_messages`, leasing each for `ack_deadline`.
    ///
    /// Waits a short while for messages and may return an empty batch.
    async fn pull(
        &self,
        max_messages: usize,
        ack_deadline: Duration,
    ) -> Result<Vec<Message>, TransportError>;

    fn retry_policy(&self) -> Option<RetryPolicy>;

    async fn set_retry_policy(&self, policy: Option<RetryPolicy>) -> Result<(), TransportError>;

    fn dead_letter_policy(&self) -> Option<DeadLetterPolicy>;

    async fn set_dead_letter_policy(
        &self,
        policy: Option<DeadLetterPolicy>,
    ) -> Result<(), TransportError>;
}
