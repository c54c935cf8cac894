//! # Message envelope as received from a transport.
//!
//! A [`Message`] carries the published body and attributes plus an opaque
//! `ack_id` and a transport-provided [`Acknowledge`] handle. Dispositions
//! (`acknowledge`, `reject`, `modify_ack_deadline`) are routed through that
//! handle, so the delivery pipeline never needs to know which transport it
//! is running on.
//!
//! Cloning a message is cheap (reference-counted fields).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// String attributes attached to every published message.
pub type Attributes = BTreeMap<String, String>;

/// Attribute carrying the unique id assigned at broadcast time.
pub const ATTR_ID: &str = "id";
/// Attribute carrying the fully namespaced event name.
pub const ATTR_EVENT_NAME: &str = "event_name";
/// Attribute carrying the propagated request id.
pub const ATTR_REQUEST_ID: &str = "request_id";

/// Transport-side disposition calls for received messages.
#[async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    /// Confirms processing; the message leaves the redelivery queue.
    async fn ack(&self, ack_id: &str) -> Result<(), TransportError>;

    /// Requests immediate redelivery.
    async fn nack(&self, ack_id: &str) -> Result<(), TransportError>;

    /// Moves the ack deadline to `deadline` from now.
    async fn modify_ack_deadline(&self, ack_id: &str, deadline: Duration)
    -> Result<(), TransportError>;
}

/// A message delivered by a subscription.
#[derive(Clone)]
pub struct Message {
    id: Arc<str>,
    data: Bytes,
    attributes: Arc<Attributes>,
    ordering_key: Option<Arc<str>>,
    delivery_attempt: Option<u32>,
    publish_time: SystemTime,
    ack_id: Arc<str>,
    acker: Arc<dyn Acknowledge>,
}

impl Message {
    /// Creates a message bound to the given acknowledgement handle.
    pub fn new(
        id: impl Into<Arc<str>>,
        data: Bytes,
        attributes: Attributes,
        ack_id: impl Into<Arc<str>>,
        acker: Arc<dyn Acknowledge>,
    ) -> Self {
        Self {
            id: id.into(),
            data,
            attributes: Arc::new(attributes),
            ordering_key: None,
            delivery_attempt: None,
            publish_time: SystemTime::now(),
            ack_id: ack_id.into(),
            acker,
        }
    }

    /// Sets the ordering key the message was published with.
    pub fn with_ordering_key(mut self, key: impl Into<Arc<str>>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }

    /// Sets the transport's delivery-attempt counter (1-based).
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = Some(attempt);
        self
    }

    /// Sets the publish timestamp.
    pub fn with_publish_time(mut self, at: SystemTime) -> Self {
        self.publish_time = at;
        self
    }

    /// Transport-assigned message id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw body bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Looks up a single attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The namespaced event name stamped at broadcast time, if any.
    pub fn event_name(&self) -> Option<&str> {
        self.attribute(ATTR_EVENT_NAME)
    }

    pub fn ordering_key(&self) -> Option<&str> {
        self.ordering_key.as_deref()
    }

    /// Delivery attempt reported by the transport, when it tracks one.
    pub fn delivery_attempt(&self) -> Option<u32> {
        self.delivery_attempt
    }

    pub fn publish_time(&self) -> SystemTime {
        self.publish_time
    }

    pub fn ack_id(&self) -> &str {
        &self.ack_id
    }

    /// Acknowledges the message.
    pub async fn acknowledge(&self) -> Result<(), TransportError> {
        self.acker.ack(&self.ack_id).await
    }

    /// Rejects the message so the transport redelivers it.
    pub async fn reject(&self) -> Result<(), TransportError> {
        self.acker.nack(&self.ack_id).await
    }

    /// Extends the ack deadline; returns `false` if the transport refused.
    pub async fn modify_ack_deadline(&self, deadline: Duration) -> bool {
        self.acker
            .modify_ack_deadline(&self.ack_id, deadline)
            .await
            .is_ok()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("ordering_key", &self.ordering_key)
            .field("delivery_attempt", &self.delivery_attempt)
            .field("bytes", &self.data.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, RecordingAcker, message};
    use super::*;

    #[tokio::test]
    async fn dispositions_are_routed_to_the_acknowledger() {
        let acker = Arc::new(RecordingAcker::default());
        let msg = message(&acker, "{}", &[(ATTR_EVENT_NAME, "user.deleted")]);

        assert_eq!(msg.event_name(), Some("user.deleted"));
        msg.acknowledge().await.unwrap();
        msg.reject().await.unwrap();
        assert!(msg.modify_ack_deadline(Duration::from_secs(30)).await);

        assert_eq!(
            acker.calls(),
            vec![Call::Ack, Call::Nack, Call::Modify(Duration::from_secs(30))]
        );
    }
}
