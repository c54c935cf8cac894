//! # Observer trait.
//!
//! [`Observe`] is how metrics, alerting or audit code listens to the delivery
//! pipeline. An observer picks the event kinds it cares about with
//! [`Observe::accepts`]; everything else never reaches its queue.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use pubsubvisor::{Event, EventKind, Observe};
//!
//! struct Alerts;
//!
//! #[async_trait]
//! impl Observe for Alerts {
//!     async fn on_event(&self, ev: &Event) {
//!         // page someone about ev.message_id
//!         let _ = ev;
//!     }
//!
//!     fn name(&self) -> &'static str { "alerts" }
//!
//!     fn accepts(&self, kind: EventKind) -> bool {
//!         matches!(kind, EventKind::RetryExhausted | EventKind::PublishFailed)
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Runtime event observer.
///
/// Runs on its own worker task behind a bounded queue; a slow observer only
/// loses its own events. Keep `on_event` non-blocking and do not panic.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Name used in logs and overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Whether events of `kind` should be queued for this observer. Default: all.
    fn accepts(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    /// Queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
