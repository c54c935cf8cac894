//! # Delivery pipeline: one message from pull to disposition.
//!
//! A pulled message becomes a [`Delivery`]. The [`Pipeline`] runs it through the
//! inbound middleware around the handler, then settles it exactly once. The
//! settlement is queued to the listener's ack workers ([`Settler`]), which talk to
//! the transport.
//!
//! ## Flow
//! ```text
//! Delivery ──► Pipeline::handle
//!                 ├─► inbound stack ──► deserialize ──► Handler::call
//!                 ├─► Ok             → Settle::Ack
//!                 └─► Err / panic    → error handlers (isolated)
//!                                       ├─► no auto-retry      → Settle::Reject
//!                                       ├─► budget left        → Settle::Extend(backoff)
//!                                       └─► budget exhausted   → Settle::GiveUp (ack)
//!
//! Delivery dropped unsettled (killed, aborted) → warn + Settle::Reject
//!
//! ack workers (push threads) ◄── mpsc ◄── Disposition { message, settle, guard }
//! ```
//!
//! ## Rules
//! - Exactly one disposition per delivery; [`Delivery`] methods consume it.
//! - The in-flight guard lives until the disposition has been applied.
//! - Error handler failures never change the disposition.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::core::inflight::InFlightGuard;
use crate::core::name::EventName;
use crate::error::HandlerError;
use crate::events::{Bus, Event, EventKind};
use crate::handlers::{ErrorHandlerRef, HandlerRef, SafeErrorHandler};
use crate::middleware::{Context, Inbound, Stack, Terminal};
use crate::policies::{RetryBackoff, RetryDecision};
use crate::serializer::Serializer;
use crate::transport::Message;

/// How a delivery is settled with the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Settle {
    Ack,
    /// Immediate redelivery.
    Reject { reason: String },
    /// Hold the message back by extending its ack deadline.
    Extend {
        delay: Duration,
        attempt: Option<u32>,
    },
    /// Retry budget used up; acknowledged.
    GiveUp { attempt: Option<u32>, max: u32 },
    /// Handed back unprocessed because the listener stopped.
    Release,
}

/// A settlement on its way to an ack worker.
pub(crate) struct Disposition {
    message: Message,
    settle: Settle,
    _guard: InFlightGuard,
}

/// A pulled message that has not been settled yet.
///
/// Dropping it unsettled rejects the message.
pub(crate) struct Delivery {
    message: Message,
    guard: Option<InFlightGuard>,
    acks: mpsc::UnboundedSender<Disposition>,
}

impl Delivery {
    pub(crate) fn new(
        message: Message,
        guard: InFlightGuard,
        acks: mpsc::UnboundedSender<Disposition>,
    ) -> Self {
        Self {
            message,
            guard: Some(guard),
            acks,
        }
    }

    pub(crate) fn message(&self) -> &Message {
        &self.message
    }

    pub(crate) fn ack(self) {
        self.settle(Settle::Ack);
    }

    pub(crate) fn reject(self, reason: impl Into<String>) {
        self.settle(Settle::Reject {
            reason: reason.into(),
        });
    }

    pub(crate) fn extend(self, delay: Duration, attempt: Option<u32>) {
        self.settle(Settle::Extend { delay, attempt });
    }

    pub(crate) fn give_up(self, attempt: Option<u32>, max: u32) {
        self.settle(Settle::GiveUp { attempt, max });
    }

    pub(crate) fn release(self) {
        self.settle(Settle::Release);
    }

    fn settle(mut self, settle: Settle) {
        if let Some(guard) = self.guard.take() {
            self.send(settle, guard);
        }
    }

    fn send(&self, settle: Settle, guard: InFlightGuard) {
        let disposition = Disposition {
            message: self.message.clone(),
            settle,
            _guard: guard,
        };
        if self.acks.send(disposition).is_err() {
            warn!(
                message_id = self.message.id(),
                "ack workers are gone, message will be redelivered after its deadline"
            );
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            warn!(
                "Message({}) was terminated from outside, rescheduling",
                self.message.id()
            );
            self.send(
                Settle::Reject {
                    reason: "terminated".into(),
                },
                guard,
            );
        }
    }
}

/// Everything needed to process messages of one listener.
pub(crate) struct Pipeline {
    pub(crate) event_name: EventName,
    pub(crate) subscription: Arc<str>,
    pub(crate) handler: HandlerRef,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) inbound: Arc<Stack<Inbound>>,
    pub(crate) error_handlers: Arc<[ErrorHandlerRef]>,
    pub(crate) retry: Option<RetryBackoff>,
    pub(crate) bus: Bus,
}

impl Pipeline {
    /// Processes one delivery and settles it.
    pub(crate) async fn handle(&self, delivery: Delivery) {
        let mut req = Inbound {
            message: delivery.message().clone(),
            context: Context {
                event_name: self.event_name.to_string(),
                subscription: self.subscription.to_string(),
                attempts: delivery.message().delivery_attempt(),
                ..Context::default()
            },
        };

        let outcome = AssertUnwindSafe(self.inbound.invoke(&mut req, self))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

        match outcome {
            Ok(()) => delivery.ack(),
            Err(err) => self.on_failure(delivery, &req.context, err),
        }
    }

    fn on_failure(&self, delivery: Delivery, context: &Context, err: HandlerError) {
        let message = delivery.message();
        error!(
            message_id = message.id(),
            subscription = %self.subscription,
            label = err.as_label(),
            "Message({}) failed: {}",
            message.id(),
            err.as_message()
        );
        let mut ev = Event::new(EventKind::HandlerFailed)
            .with_event_name(&self.event_name)
            .with_subscription(Arc::clone(&self.subscription))
            .with_message_id(message.id())
            .with_reason(err.as_message());
        if let Some(n) = context.attempts {
            ev = ev.with_attempt(n);
        }
        self.bus.publish(ev);

        for handler in self.error_handlers.iter() {
            if let Err(reason) = SafeErrorHandler::invoke(handler.as_ref(), &err, message) {
                self.bus.publish(
                    Event::new(EventKind::ErrorHandlerFailed)
                        .with_subscription(Arc::clone(&self.subscription))
                        .with_message_id(message.id())
                        .with_reason(reason),
                );
            }
        }

        match self.retry {
            None => delivery.reject(err.as_label()),
            Some(backoff) => match backoff.decide(context.attempts) {
                RetryDecision::Extend(delay) => delivery.extend(delay, context.attempts),
                RetryDecision::GiveUp => delivery.give_up(context.attempts, backoff.max_attempts),
            },
        }
    }
}

#[async_trait]
impl Terminal<Inbound> for Pipeline {
    async fn call(&self, req: &mut Inbound) -> Result<(), HandlerError> {
        let payload = self.serializer.deserialize(req.message.data())?;
        self.handler.call(payload, &req.message).await
    }
}

/// Applies dispositions for one listener.
#[derive(Clone)]
pub(crate) struct Settler {
    pub(crate) event_name: EventName,
    pub(crate) subscription: Arc<str>,
    pub(crate) bus: Bus,
}

impl Settler {
    /// Spawns `workers` tasks sharing `rx`; they exit once every sender is gone.
    pub(crate) fn spawn(
        self,
        workers: usize,
        rx: mpsc::UnboundedReceiver<Disposition>,
        tracker: &TaskTracker,
    ) {
        let rx = Arc::new(Mutex::new(rx));
        for _ in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let me = self.clone();
            tracker.spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(disposition) = next else { break };
                    me.apply(disposition).await;
                }
            });
        }
    }

    fn event(&self, kind: EventKind, message: &Message) -> Event {
        Event::new(kind)
            .with_event_name(&self.event_name)
            .with_subscription(Arc::clone(&self.subscription))
            .with_message_id(message.id())
    }

    async fn apply(&self, disposition: Disposition) {
        let Disposition {
            message, settle, ..
        } = disposition;
        let id = message.id();

        match settle {
            Settle::Ack => match message.acknowledge().await {
                Ok(()) => {
                    debug!("Message({id}) was acknowledged");
                    self.bus.publish(self.event(EventKind::MessageAcked, &message));
                }
                Err(e) => warn!(message_id = id, error = %e, "acknowledge failed"),
            },
            Settle::Reject { reason } => {
                if let Err(e) = message.reject().await {
                    warn!(message_id = id, error = %e, "reject failed");
                    return;
                }
                debug!(message_id = id, reason = %reason, "message rejected for redelivery");
                self.bus.publish(
                    self.event(EventKind::MessageRejected, &message)
                        .with_reason(reason),
                );
            }
            Settle::Extend { delay, attempt } => {
                if !message.modify_ack_deadline(delay).await {
                    warn!(message_id = id, "could not extend the ack deadline");
                    return;
                }
                debug!(
                    "Message({id}) failed, added {} seconds of delay to ack deadline",
                    delay.as_secs()
                );
                let mut ev = self
                    .event(EventKind::DeadlineExtended, &message)
                    .with_delay(delay);
                if let Some(n) = attempt {
                    ev = ev.with_attempt(n);
                }
                self.bus.publish(ev);
            }
            Settle::GiveUp { attempt, max } => match message.acknowledge().await {
                Ok(()) => {
                    debug!(
                        "Message({id}) failed, number of attempts exceeded max attempts of {max}, acknowledging message"
                    );
                    let mut ev = self.event(EventKind::RetryExhausted, &message);
                    if let Some(n) = attempt {
                        ev = ev.with_attempt(n);
                    }
                    self.bus.publish(ev);
                }
                Err(e) => warn!(message_id = id, error = %e, "acknowledge failed"),
            },
            Settle::Release => {
                if let Err(e) = message.reject().await {
                    warn!(message_id = id, error = %e, "release failed");
                } else {
                    debug!(message_id = id, "message released unprocessed");
                }
            }
        }
    }
}
