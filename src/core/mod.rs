//! Delivery core: adapter, listeners and the runner.
//!
//! Internal modules:
//! - [`adapter`]: publish path, subscriber and listener registry;
//! - [`registry`]: single-flight find-or-create of topics;
//! - [`listener`]: one subscription, its pull loops and lifecycle;
//! - [`dispatch`]: per-message pipeline and ack workers;
//! - [`inflight`]: drain tracking;
//! - [`runner`]: bulk lifecycle, graceful shutdown, probes and debug dump;
//! - [`control`] / [`signals`]: serial command channel fed by OS signals;
//! - [`config`] / [`name`]: configuration values and namespaced names.

mod adapter;
mod builder;
mod config;
mod control;
mod dispatch;
mod inflight;
mod listener;
mod name;
mod registry;
mod runner;
mod signals;

pub use adapter::{Adapter, PublishOptions, Subscriber};
pub use builder::AdapterBuilder;
pub use config::{AutoRetryConfig, Config, ListenerSettings, SubscribeOptions, SubscriberDefaults};
pub use control::{Command, ControlError, ControlHandle, channel};
pub use listener::{Listener, ListenerState};
pub use name::EventName;
pub use runner::Runner;
pub use signals::forward_signals;
