//! Request-id propagation across publish and delivery.
//!
//! Inbound, [`RequestId`] takes the `request_id` attribute of the delivered
//! message (or a fresh UUID) and makes it current for the rest of the chain.
//! Outbound, [`StampRequestId`] copies the current request id (or a fresh UUID)
//! into the publish attributes, so events broadcast from inside a handler carry
//! the id of the message that caused them.

use async_trait::async_trait;
use uuid::Uuid;

use super::{Inbound, Middleware, Next, Outbound};
use crate::error::HandlerError;
use crate::transport::ATTR_REQUEST_ID;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// The request id of the delivery being handled by the current task, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

/// Inbound: sets the current request id for the duration of the call.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestId;

#[async_trait]
impl Middleware<Inbound> for RequestId {
    async fn call(&self, req: &mut Inbound, next: Next<'_, Inbound>) -> Result<(), HandlerError> {
        let id = req
            .message
            .attribute(ATTR_REQUEST_ID)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        req.context.request_id = Some(id.clone());
        let res = REQUEST_ID.scope(id, next.run(req)).await;
        req.context.request_id = None;
        res
    }

    fn name(&self) -> &'static str {
        "request_id"
    }
}

/// Outbound: stamps the current request id onto the publish.
#[derive(Clone, Copy, Debug, Default)]
pub struct StampRequestId;

#[async_trait]
impl Middleware<Outbound> for StampRequestId {
    async fn call(&self, req: &mut Outbound, next: Next<'_, Outbound>) -> Result<(), HandlerError> {
        let id = current_request_id().unwrap_or_else(|| Uuid::new_v4().to_string());
        req.attributes.insert(ATTR_REQUEST_ID.to_string(), id);
        next.run(req).await
    }

    fn name(&self) -> &'static str {
        "request_id"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Context, Stack, Terminal};
    use crate::transport::testing::{RecordingAcker, message};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Capture {
        seen: Mutex<Option<(Option<String>, Option<String>)>>,
    }

    #[async_trait]
    impl Terminal<Inbound> for Capture {
        async fn call(&self, req: &mut Inbound) -> Result<(), HandlerError> {
            *self.seen.lock() = Some((req.context.request_id.clone(), current_request_id()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn inbound_id_comes_from_the_message_and_is_cleared_after() {
        let acker = Arc::new(RecordingAcker::default());
        let mut req = Inbound {
            message: message(&acker, "{}", &[(ATTR_REQUEST_ID, "req-7")]),
            context: Context::default(),
        };
        let mut stack = Stack::new();
        stack.append(Arc::new(RequestId));

        let capture = Capture::default();
        stack.invoke(&mut req, &capture).await.unwrap();

        let seen = capture.seen.lock().clone().unwrap();
        assert_eq!(seen.0.as_deref(), Some("req-7"));
        assert_eq!(seen.1.as_deref(), Some("req-7"));
        assert_eq!(req.context.request_id, None);
        assert_eq!(current_request_id(), None);
    }

    struct Noop;

    #[async_trait]
    impl Terminal<Outbound> for Noop {
        async fn call(&self, _req: &mut Outbound) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn outbound_reuses_the_current_id() {
        let mut stack = Stack::new();
        stack.append(Arc::new(StampRequestId));
        let mut req = Outbound {
            event_name: "user.deleted".into(),
            data: Bytes::new(),
            attributes: Default::default(),
            ordering_key: None,
        };

        REQUEST_ID
            .scope("req-9".to_string(), stack.invoke(&mut req, &Noop))
            .await
            .unwrap();
        assert_eq!(req.attributes.get(ATTR_REQUEST_ID).map(String::as_str), Some("req-9"));

        req.attributes.clear();
        stack.invoke(&mut req, &Noop).await.unwrap();
        let fresh = req.attributes.get(ATTR_REQUEST_ID).unwrap();
        assert!(Uuid::parse_str(fresh).is_ok());
    }
}
