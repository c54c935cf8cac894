//! # Message handlers.
//!
//! A [`Handler`] receives the decoded payload of each delivered message plus the
//! raw [`Message`] (attributes, id, delivery attempt). Handlers that do not need
//! the raw message simply ignore it.
//!
//! [`HandlerFn`] wraps a closure `F: Fn(Value, Message) -> Fut`, producing a fresh
//! future per delivery.
//!
//! ## Example
//! ```rust
//! use pubsubvisor::{HandlerError, HandlerFn, HandlerRef};
//!
//! let h: HandlerRef = HandlerFn::arc(|payload, _msg| async move {
//!     if payload.get("user_id").is_none() {
//!         return Err(HandlerError::fail("missing user_id"));
//!     }
//!     Ok(())
//! });
//! # let _ = h;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerError;
use crate::transport::Message;

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Business logic invoked once per delivered message.
///
/// Returning `Err` (or panicking) marks the delivery as failed; the listener then
/// runs the error handlers and applies the retry policy. Handlers must be
/// idempotent: delivery is at-least-once.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, payload: Value, message: &Message) -> Result<(), HandlerError>;
}

/// Closure-backed handler.
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Value, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Value, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn call(&self, payload: Value, message: &Message) -> Result<(), HandlerError> {
        (self.f)(payload, message.clone()).await
    }
}
