//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the adapter, listeners,
//! runner and observer workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Adapter` (topics, publishes), `Listener` (wiring and
//!   dispositions), `Runner` (shutdown), `ObserverSet` workers (overflow/panic).
//! - **Consumers**: the adapter's observer pump, which fans out to the
//!   configured [`ObserverSet`](crate::ObserverSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
