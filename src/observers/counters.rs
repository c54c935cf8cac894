//! # Counters: in-process delivery metrics.
//!
//! A stateful observer that keeps atomic counters of publishes and message
//! dispositions. Attach it with
//! [`AdapterBuilder::observer`](crate::AdapterBuilder::observer) and read it with
//! [`Counters::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use super::Observe;
use crate::events::{Event, EventKind};

/// Point-in-time copy of [`Counters`]; serializable for export.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub acked: u64,
    pub rejected: u64,
    pub extended: u64,
    pub exhausted: u64,
    pub handler_failures: u64,
}

#[derive(Debug, Default)]
pub struct Counters {
    published: AtomicU64,
    publish_failures: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    extended: AtomicU64,
    exhausted: AtomicU64,
    handler_failures: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            extended: self.extended.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, kind: EventKind) -> Option<&AtomicU64> {
        match kind {
            EventKind::PublishSucceeded => Some(&self.published),
            EventKind::PublishFailed => Some(&self.publish_failures),
            EventKind::MessageAcked => Some(&self.acked),
            EventKind::MessageRejected => Some(&self.rejected),
            EventKind::DeadlineExtended => Some(&self.extended),
            EventKind::RetryExhausted => Some(&self.exhausted),
            EventKind::HandlerFailed => Some(&self.handler_failures),
            _ => None,
        }
    }
}

#[async_trait]
impl Observe for Counters {
    async fn on_event(&self, event: &Event) {
        if let Some(c) = self.counter(event.kind) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn name(&self) -> &'static str {
        "counters"
    }

    fn accepts(&self, kind: EventKind) -> bool {
        self.counter(kind).is_some()
    }

    fn queue_capacity(&self) -> usize {
        4096
    }
}
