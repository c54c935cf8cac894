//! # Runtime-event observers.
//!
//! This module provides the [`Observe`] trait, the [`ObserverSet`] fan-out and
//! the built-in [`Counters`] metrics observer.
//!
//! ## Architecture
//! ```text
//!   Listener ── publish(Event) ──► Bus ──► observer pump ──► ObserverSet
//!                                                               │
//!                                                 ┌─────────────┼─────────────┐
//!                                                 ▼             ▼             ▼
//!                                              Counters       Alerts        Custom
//! ```

mod counters;
mod observe;
mod set;

pub use counters::{Counters, CountersSnapshot};
pub use observe::Observe;
pub use set::ObserverSet;
