//! Error types used by the delivery pipeline, transports and handlers.
//!
//! This module defines four enums:
//!
//! - [`Error`] — setup-time errors surfaced synchronously to callers of
//!   `broadcast`, `subscribe`, `register` and `start` (missing topics, rebinding
//!   conflicts, unknown middleware, ...).
//! - [`HandlerError`] — errors raised while processing one delivered message.
//!   These never escape the listener; they drive the ack/retry policy.
//! - [`TransportError`] — failures reported by the wrapped pub/sub transport.
//! - [`RuntimeError`] — errors of the supervising runner itself.
//!
//! All of them provide `as_label` (stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by user callbacks (error handlers, shutdown hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # Setup and wiring errors.
///
/// These are configuration mistakes rather than runtime conditions: they are
/// raised synchronously and are expected to fail the caller fast.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// The topic does not exist and auto-creation of topics is disabled.
    #[error("topic '{topic}' not found and auto-create is disabled")]
    TopicNotFound {
        /// Fully namespaced topic name.
        topic: String,
    },

    /// The subscription does not exist and auto-creation of subscriptions is disabled.
    #[error("subscription '{subscription}' not found and auto-create is disabled")]
    SubscriptionNotFound {
        /// Fully namespaced subscription name.
        subscription: String,
    },

    /// An existing subscription is bound to a different topic than requested.
    #[error(
        "subscription '{subscription}' is bound to topic '{actual}', expected '{expected}'"
    )]
    SubscriptionTopicNameMismatch {
        /// Fully namespaced subscription name.
        subscription: String,
        /// Topic the caller asked for.
        expected: String,
        /// Topic the subscription is actually bound to.
        actual: String,
    },

    /// `start` was called on a listener that was never registered.
    #[error("no subscriber has been registered for '{event_name}'")]
    NoSubscriber {
        /// Event the listener was created for.
        event_name: String,
    },

    /// A middleware name could not be resolved to an interceptor.
    #[error("middleware '{name}' is not callable: unknown middleware name")]
    InvalidMiddleware {
        /// The rejected middleware name.
        name: String,
    },

    /// An outbound interceptor failed while wrapping a publish.
    #[error("outbound middleware failed: {0}")]
    Middleware(#[source] HandlerError),

    /// The payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The transport rejected a setup call.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use pubsubvisor::Error;
    ///
    /// let err = Error::TopicNotFound { topic: "user.deleted".into() };
    /// assert_eq!(err.as_label(), "topic_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::TopicNotFound { .. } => "topic_not_found",
            Error::SubscriptionNotFound { .. } => "subscription_not_found",
            Error::SubscriptionTopicNameMismatch { .. } => "subscription_topic_name_mismatch",
            Error::NoSubscriber { .. } => "no_subscriber",
            Error::InvalidMiddleware { .. } => "invalid_middleware",
            Error::Middleware(_) => "middleware_failed",
            Error::Serialization(_) => "serialization_failed",
            Error::Transport(_) => "transport_error",
        }
    }
}

/// # Errors produced while handling one delivered message.
///
/// Any of these makes the delivery count as *failed*: error handlers run and
/// the failure policy (reject or back off) is applied.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// Business logic failed.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The message body could not be decoded into a payload.
    #[error("payload could not be decoded: {error}")]
    Decode {
        /// The decoder's message.
        error: String,
    },

    /// The handler (or an interceptor) panicked.
    #[error("handler panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use pubsubvisor::HandlerError;
    ///
    /// assert_eq!(HandlerError::fail("boom").as_label(), "handler_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::Decode { .. } => "handler_decode_failed",
            HandlerError::Panicked { .. } => "handler_panicked",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            HandlerError::Fail { error } => format!("error: {error}"),
            HandlerError::Decode { error } => format!("decode: {error}"),
            HandlerError::Panicked { info } => format!("panic: {info}"),
        }
    }

    /// Builds a [`HandlerError::Panicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        HandlerError::Panicked {
            info: panic_message(&*payload),
        }
    }
}

/// Renders a panic payload (`&str` / `String`) as text.
pub(crate) fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// # Errors reported by a transport implementation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The addressed resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A create call raced with another creator.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// The transport (or one of its publishers) has been closed.
    #[error("transport closed")]
    Closed,

    /// The transport refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Any other failure.
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::NotFound(_) => "transport_not_found",
            TransportError::AlreadyExists(_) => "transport_already_exists",
            TransportError::Closed => "transport_closed",
            TransportError::Rejected(_) => "transport_rejected",
            TransportError::Other(_) => "transport_other",
        }
    }
}

/// # Errors produced by the runner.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Listeners were still processing messages when the drain timeout elapsed.
    #[error("drain timeout {timeout:?} exceeded; busy listeners: {busy:?}")]
    DrainExceeded {
        /// The configured drain timeout.
        timeout: Duration,
        /// Listeners that still had in-flight messages.
        busy: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use pubsubvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::DrainExceeded { timeout: Duration::from_secs(5), busy: vec![] };
    /// assert_eq!(err.as_label(), "runtime_drain_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::DrainExceeded { .. } => "runtime_drain_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::DrainExceeded { timeout, busy } => {
                format!("drain exceeded after {timeout:?}; busy listeners={busy:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_common_payloads() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(&*boxed), "static boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(&*boxed), "owned boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }

    #[test]
    fn mismatch_message_names_both_topics() {
        let err = Error::SubscriptionTopicNameMismatch {
            subscription: "audit".into(),
            expected: "user.deleted".into(),
            actual: "user.created".into(),
        };
        let text = err.to_string();
        assert!(text.contains("user.deleted"));
        assert!(text.contains("user.created"));
    }
}
