//! # Fan-out of runtime events to observers.
//!
//! Each observer owns a lane: a bounded queue drained by its own worker task.
//! [`ObserverSet::emit`] only offers an event to lanes whose observer
//! [accepts](Observe::accepts) its kind, so a metrics observer never queues
//! wiring or shutdown noise.
//!
//! ```text
//! emit(event) ──► lane "counters" (accepts acked/rejected/...) ──► worker ──► on_event
//!             ├─► lane "alerts"   (accepts retry_exhausted)    ──► worker ──► on_event
//!             └─► lane "audit"    (accepts everything)         ──► worker ──► on_event
//! ```
//!
//! ## Rules
//! - `emit` never waits: a full or closed lane drops the event for that observer
//!   and publishes `ObserverOverflow` (never for observer-internal events).
//! - A panic in `on_event` is reported as `ObserverPanicked`; the lane keeps going.
//! - Per observer, events arrive in emit order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::task::TaskTracker;
use tracing::warn;

use super::Observe;
use crate::error::panic_message;
use crate::events::{Bus, Event};

/// One observer with its queue.
struct Lane {
    observer: Arc<dyn Observe>,
    queue: mpsc::Sender<Arc<Event>>,
}

impl Lane {
    fn open(observer: Arc<dyn Observe>, bus: &Bus, workers: &TaskTracker) -> Self {
        let (queue, rx) = mpsc::channel(observer.queue_capacity().max(1));
        workers.spawn(drain(Arc::clone(&observer), rx, bus.clone()));
        Self { observer, queue }
    }

    /// Queues `event` if the observer wants it; returns why it was dropped otherwise.
    fn offer(&self, event: &Arc<Event>) -> Option<&'static str> {
        if !self.observer.accepts(event.kind) {
            return None;
        }
        match self.queue.try_send(Arc::clone(event)) {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => Some("full"),
            Err(TrySendError::Closed(_)) => Some("closed"),
        }
    }
}

async fn drain(observer: Arc<dyn Observe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(event) = rx.recv().await {
        let outcome = AssertUnwindSafe(observer.on_event(&event)).catch_unwind().await;
        if let Err(panic) = outcome {
            warn!(observer = observer.name(), kind = ?event.kind, "observer panicked");
            bus.publish(Event::observer_panicked(observer.name(), panic_message(&*panic)));
        }
    }
}

/// Observers attached to an adapter.
pub struct ObserverSet {
    lanes: Vec<Lane>,
    workers: TaskTracker,
    bus: Bus,
}

impl ObserverSet {
    /// Opens one lane per observer.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn Observe>>, bus: Bus) -> Self {
        let workers = TaskTracker::new();
        let lanes = observers
            .into_iter()
            .map(|observer| Lane::open(observer, &bus, &workers))
            .collect();
        Self {
            lanes,
            workers,
            bus,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Offers `event` to every interested observer.
    pub fn emit(&self, event: Arc<Event>) {
        for lane in &self.lanes {
            let Some(reason) = lane.offer(&event) else { continue };
            if !event.is_observer_internal() {
                self.bus
                    .publish(Event::observer_overflow(lane.observer.name(), reason));
            }
        }
    }

    /// Closes every lane and waits until the queued events were handled.
    pub async fn shutdown(self) {
        drop(self.lanes);
        self.workers.close();
        self.workers.wait().await;
    }
}
