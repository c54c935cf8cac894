//! # pubsubvisor
//!
//! **pubsubvisor** is a supervised event delivery layer over managed
//! publish/subscribe transports.
//!
//! Application code `broadcast`s named events and `subscribe`s handlers to them;
//! the crate owns topic and subscription binding, concurrent delivery,
//! acknowledgement, retry with backoff, dead-lettering and orderly shutdown.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   broadcast(name, payload)                         subscribe(name, id, handler)
//!            │                                                 │
//!            ▼                                                 ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Adapter                                                              │
//! │  - TopicRegistry (namespaced name → topic, single flight)             │
//! │  - outbound / inbound middleware stacks                               │
//! │  - Subscribers + Listeners                                            │
//! │  - Bus (runtime events) ──► ObserverSet (Counters, custom observers)  │
//! └──────┬──────────────────────────────────────────────┬─────────────────┘
//!        │ publish_async                                │ one per (name, id)
//!        ▼                                              ▼
//!   Transport::Topic                          ┌──────────────────────┐
//!                                             │  Listener            │
//!                                             │  pull loops (streams)│
//!                                             │  callbacks (permits) │
//!                                             │  ack workers (push)  │
//!                                             └──────────┬───────────┘
//!                                                        ▼
//!                                   inbound stack ──► Handler::call
//!                                        ├─ Ok  ──► ack
//!                                        └─ Err ──► error handlers ──► reject | extend deadline | give up
//!
//! Runner: start / pause / resume / gracefully_shutdown / force_shutdown / ready / debug_info
//!   ▲
//!   └── Runner::drive ◄── ControlHandle ◄── forward_signals (SIGTSTP, SIGCONT, SIGTTIN, SIGINT, ...)
//! ```
//!
//! ### Delivery policy
//! ```text
//! handler ok                                   → acknowledge
//! handler failed, auto-retry disabled          → reject (transport redelivers)
//! handler failed, auto-retry enabled
//!   ├─ attempts < max_attempts                 → extend ack deadline by backoff
//!   └─ attempts >= max_attempts                → acknowledge (give up)
//! callback aborted before settling             → reject
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Publishing**    | Namespaced, fire-and-forget publishes with attributes.         | [`Adapter`], [`PublishOptions`]             |
//! | **Consuming**     | Listeners with bounded concurrency and exactly-one settlement. | [`Listener`], [`Handler`], [`HandlerFn`]    |
//! | **Middleware**    | Interceptors around publish and delivery.                      | [`Middleware`], [`Stack`]                   |
//! | **Retry**         | Polynomial backoff with budget and dead-lettering.             | [`RetryBackoff`], [`AutoRetryConfig`]       |
//! | **Supervision**   | Bulk lifecycle, probes, graceful drain, control channel.       | [`Runner`], [`ControlHandle`]               |
//! | **Observability** | Typed runtime events and observers.                            | [`Event`], [`Observe`], [`Counters`]        |
//! | **Errors**        | Typed setup, handler, transport and runtime errors.            | [`Error`], [`HandlerError`], [`RuntimeError`] |
//! | **Transports**    | Transport traits and an in-process implementation.             | [`Transport`], [`MemoryTransport`]          |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pubsubvisor::{Adapter, Config, MemoryTransport, Runner};
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Adapter::builder(Arc::new(MemoryTransport::new()))
//!         .config(Config {
//!             auto_create_topics: true,
//!             auto_create_subscriptions: true,
//!             shutdown_grace: Duration::from_millis(100),
//!             ..Config::default()
//!         })
//!         .build()?;
//!
//!     adapter
//!         .subscribe("user.deleted", "audit", |payload, _msg| async move {
//!             println!("user deleted: {}", payload["user_id"]);
//!             Ok(())
//!         })
//!         .await?;
//!
//!     let runner = Runner::new(adapter.clone());
//!     runner.start()?;
//!     adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;
//!
//!     runner.gracefully_shutdown().await?;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod handlers;
mod middleware;
mod observers;
mod policies;
mod serializer;
mod transport;

// ---- Public re-exports ----

pub use core::{
    Adapter, AdapterBuilder, AutoRetryConfig, Command, Config, ControlError, ControlHandle,
    EventName, Listener, ListenerSettings, ListenerState, PublishOptions, Runner, SubscribeOptions,
    Subscriber, SubscriberDefaults, channel as control_channel, forward_signals,
};
pub use error::{BoxError, Error, HandlerError, RuntimeError, TransportError};
pub use events::{Bus, Event, EventKind};
pub use handlers::{
    ErrorHandler, ErrorHandlerFn, ErrorHandlerRef, Handler, HandlerFn, HandlerRef, LogErrors,
    SafeErrorHandler, ShutdownFn, ShutdownHook, ShutdownHookRef,
};
pub use middleware::{
    Context, Inbound, Logging, Middleware, Next, Outbound, RequestId, Stack, StampRequestId,
    Terminal, current_request_id,
};
pub use observers::{Counters, CountersSnapshot, Observe, ObserverSet};
pub use policies::{BackoffJitter, RetryBackoff, RetryDecision, UNKNOWN_ATTEMPT_DELAY};
pub use serializer::{JsonSerializer, Serializer};
pub use transport::{
    ATTR_EVENT_NAME, ATTR_ID, ATTR_REQUEST_ID, Acknowledge, Attributes, DeadLetterPolicy,
    MemorySubscription, MemoryTopic, MemoryTransport, Message, PublishHandle, PublishResult,
    PublishedMessage, RetryPolicy, Subscription, SubscriptionRef, SubscriptionStats, Topic,
    TopicRef, Transport,
};

/// Built-in middleware resolved by name.
pub mod catalog {
    pub use crate::middleware::{inbound, inbound_stack, outbound, outbound_stack};
}
