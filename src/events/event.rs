//! # Runtime events emitted by the adapter, listeners and runner.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Wiring events**: topics and subscriptions created, listeners registered
//! - **Delivery events**: per-message dispositions (acked, rejected, deadline extended)
//! - **Publish events**: outcome of fire-and-forget broadcasts
//! - **Shutdown events**: graceful shutdown progress and hook failures
//!
//! The [`Event`] struct carries additional metadata such as timestamps, event
//! name, subscription, message id, reasons and backoff delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use pubsubvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::DeadlineExtended)
//!     .with_event_name("user.deleted")
//!     .with_subscription("audit")
//!     .with_message_id("42")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(96));
//!
//! assert_eq!(ev.kind, EventKind::DeadlineExtended);
//! assert_eq!(ev.event_name.as_deref(), Some("user.deleted"));
//! assert_eq!(ev.delay_ms, Some(96_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Observer events ===
    /// Observer panicked during event processing.
    ///
    /// Sets:
    /// - `subscription`: observer name
    /// - `reason`: panic info/message
    ObserverPanicked,

    /// Observer dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `subscription`: observer name
    /// - `reason`: reason string (e.g., "full", "closed")
    ObserverOverflow,

    // === Wiring events ===
    /// A topic was created on the transport (first use of an event name).
    ///
    /// Sets:
    /// - `event_name`: namespaced topic name
    TopicCreated,

    /// A subscription was created on the transport.
    ///
    /// Sets:
    /// - `event_name`: namespaced topic name
    /// - `subscription`: namespaced subscription name
    SubscriptionCreated,

    /// A listener completed `register` (subscription resolved, policies reconciled).
    ///
    /// Sets:
    /// - `event_name`, `subscription`
    ListenerRegistered,

    /// A listener began pulling messages.
    ///
    /// Sets:
    /// - `event_name`, `subscription`
    ListenerStarted,

    /// A listener stopped pulling messages.
    ///
    /// Sets:
    /// - `event_name`, `subscription`
    ListenerStopped,

    // === Delivery events ===
    /// A message was processed successfully and acknowledged.
    ///
    /// Sets:
    /// - `event_name`, `subscription`, `message_id`
    MessageAcked,

    /// A message was rejected for immediate redelivery.
    ///
    /// Sets:
    /// - `event_name`, `subscription`, `message_id`
    /// - `reason`: why (handler failure, or terminated from outside)
    MessageRejected,

    /// A failed message got its ack deadline extended by a backoff window.
    ///
    /// Sets:
    /// - `event_name`, `subscription`, `message_id`
    /// - `attempt`: delivery attempt, if known
    /// - `delay_ms`: backoff applied (ms)
    DeadlineExtended,

    /// A failed message exceeded its retry budget and was acknowledged anyway.
    ///
    /// Sets:
    /// - `event_name`, `subscription`, `message_id`
    /// - `attempt`: delivery attempt
    RetryExhausted,

    /// The handler (or inbound middleware) failed for one delivery.
    ///
    /// Sets:
    /// - `event_name`, `subscription`, `message_id`
    /// - `reason`: failure message
    HandlerFailed,

    /// A user error handler failed or panicked; the failure was swallowed.
    ///
    /// Sets:
    /// - `message_id`
    /// - `reason`: failure message
    ErrorHandlerFailed,

    // === Publish events ===
    /// A broadcast was sent by the transport.
    ///
    /// Sets:
    /// - `event_name`, `message_id`
    PublishSucceeded,

    /// A broadcast failed inside the transport.
    ///
    /// Sets:
    /// - `event_name`
    /// - `reason`: transport error
    PublishFailed,

    /// Every publish buffered so far was sent or failed (`flush_messages`).
    ///
    /// Sets:
    /// - `reason`: number of topics flushed
    MessagesFlushed,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or control command).
    ShutdownRequested,

    /// A shutdown hook failed or panicked.
    ///
    /// Sets:
    /// - `reason`: failure message
    ShutdownHookFailed,

    /// All listeners drained within the configured drain timeout.
    AllDrained,

    /// Drain timeout exceeded; some listeners still had in-flight messages.
    ///
    /// Sets:
    /// - `reason`: busy listeners
    DrainExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Namespaced event (topic) name, if applicable.
    pub event_name: Option<Arc<str>>,
    /// Namespaced subscription name (or observer name for observer events).
    pub subscription: Option<Arc<str>>,
    /// Transport message id.
    pub message_id: Option<Arc<str>>,
    /// Delivery attempt, when the transport reports one.
    pub attempt: Option<u32>,
    /// Backoff delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            event_name: None,
            subscription: None,
            message_id: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_event_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    #[inline]
    pub fn with_subscription(mut self, name: impl Into<Arc<str>>) -> Self {
        self.subscription = Some(name.into());
        self
    }

    #[inline]
    pub fn with_message_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Attaches a delivery attempt.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates an observer overflow event.
    #[inline]
    pub fn observer_overflow(observer: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::ObserverOverflow)
            .with_subscription(observer)
            .with_reason(format!("observer={observer} reason={reason}"))
    }

    /// Creates an observer panic event.
    #[inline]
    pub fn observer_panicked(observer: &'static str, info: String) -> Self {
        Event::new(EventKind::ObserverPanicked)
            .with_subscription(observer)
            .with_reason(info)
    }

    /// True for events raised by the observer machinery itself.
    #[inline]
    pub fn is_observer_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ObserverOverflow | EventKind::ObserverPanicked
        )
    }
}
