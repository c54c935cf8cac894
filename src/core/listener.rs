//! # Listener: one subscription, its lifecycle and its delivery workers.
//!
//! A [`Listener`] exists per `(event name, subscriber id)` pair. It binds the
//! subscription, applies retry / dead-letter policies, and while running drives
//! pull loops, handler callbacks and ack workers.
//!
//! ## State machine
//! ```text
//! Unregistered ──register()──► Registered ──start()──► Running ──stop()──► Stopped
//!                                                         ▲                  │
//!                                                         └─────start()──────┘
//! ```
//!
//! ## Tasks of one run
//! ```text
//! pull loop × streams ──► Subscription::pull(max_messages, deadline)
//!     └─► per message: in-flight guard ──► callback permit (callback_threads)
//!            └─► handler task: Pipeline::handle  (aborted by kill → rejected)
//!                   └─► Disposition ──► ack worker × push_threads ──► transport
//! ```
//!
//! ## Rules
//! - `stop()` ends pulling; running callbacks finish and are settled.
//! - Messages pulled but not yet started when `stop()` lands are released (nacked).
//! - `wait()` resolves once every task of every run has finished.
//! - `kill()` additionally aborts running callbacks; their messages are rejected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::core::adapter::Shared;
use crate::core::config::{ListenerSettings, SubscribeOptions};
use crate::core::dispatch::{Delivery, Disposition, Pipeline, Settler};
use crate::core::inflight::InFlight;
use crate::core::name::EventName;
use crate::error::{Error, TransportError};
use crate::events::{Event, EventKind};
use crate::handlers::HandlerRef;
use crate::transport::{DeadLetterPolicy, SubscriptionRef, TopicRef};

/// Pause after a failed pull before trying again.
const PULL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Lifecycle state of a [`Listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerState {
    Unregistered,
    Registered,
    Running,
    Stopped,
}

impl ListenerState {
    pub fn as_label(&self) -> &'static str {
        match self {
            ListenerState::Unregistered => "unregistered",
            ListenerState::Registered => "registered",
            ListenerState::Running => "running",
            ListenerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Tokens and tasks of one `start()`.
struct Run {
    stop: CancellationToken,
    kill: CancellationToken,
    tracker: TaskTracker,
}

impl Run {
    fn finished(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }
}

struct State {
    phase: ListenerState,
    subscription: Option<SubscriptionRef>,
    settings: Option<ListenerSettings>,
    runs: Vec<Run>,
}

struct Inner {
    event_name: EventName,
    subscription_name: EventName,
    options: SubscribeOptions,
    handler: HandlerRef,
    shared: Arc<Shared>,
    inflight: Arc<InFlight>,
    state: Mutex<State>,
}

/// Consumer of one subscription.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<Inner>,
}

impl Listener {
    pub(crate) fn new(
        event_name: EventName,
        subscription_name: EventName,
        options: SubscribeOptions,
        handler: HandlerRef,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                event_name,
                subscription_name,
                options,
                handler,
                shared,
                inflight: InFlight::new(),
                state: Mutex::new(State {
                    phase: ListenerState::Unregistered,
                    subscription: None,
                    settings: None,
                    runs: Vec::new(),
                }),
            }),
        }
    }

    /// Namespaced event name.
    pub fn event_name(&self) -> &str {
        self.inner.event_name.as_str()
    }

    /// Namespaced subscription name.
    pub fn subscription_name(&self) -> &str {
        self.inner.subscription_name.as_str()
    }

    pub fn state(&self) -> ListenerState {
        self.inner.state.lock().phase
    }

    /// True once `start()` has completed and until `stop()`.
    pub fn is_started(&self) -> bool {
        self.state() == ListenerState::Running
    }

    /// Effective settings; `None` before registration.
    pub fn settings(&self) -> Option<ListenerSettings> {
        self.inner.state.lock().settings
    }

    /// Messages pulled and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.count()
    }

    /// True when no task of any run is left.
    pub fn is_drained(&self) -> bool {
        self.inner.state.lock().runs.iter().all(Run::finished)
    }

    /// True if both handles refer to the same listener.
    pub fn same_as(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Binds the subscription and reconciles its policies.
    ///
    /// # Errors
    /// - [`Error::TopicNotFound`] / [`Error::SubscriptionNotFound`] when missing and
    ///   auto-creation is disabled
    /// - [`Error::SubscriptionTopicNameMismatch`] when the subscription is bound elsewhere
    /// - [`Error::Transport`] when the transport fails
    pub async fn register(&self) -> Result<(), Error> {
        let shared = &self.inner.shared;
        let topic = shared.registry.resolve(&self.inner.event_name).await?;
        let subscription = self.resolve_subscription(&topic).await?;
        if shared.config.auto_retry.enabled {
            self.reconcile_policies(&subscription).await?;
        }
        let settings = ListenerSettings::merge(&shared.config.subscriber, &self.inner.options);

        {
            let mut st = self.inner.state.lock();
            st.subscription = Some(subscription);
            st.settings = Some(settings);
            if st.phase == ListenerState::Unregistered {
                st.phase = ListenerState::Registered;
            }
        }

        info!(
            event_name = self.event_name(),
            subscription = self.subscription_name(),
            streams = settings.streams,
            callback_threads = settings.callback_threads,
            push_threads = settings.push_threads,
            "registered listener"
        );
        shared.bus.publish(self.event(EventKind::ListenerRegistered));
        Ok(())
    }

    async fn resolve_subscription(&self, topic: &TopicRef) -> Result<SubscriptionRef, Error> {
        let name = self.subscription_name();
        let not_found = || Error::SubscriptionNotFound {
            subscription: name.to_string(),
        };

        let subscription = match topic.find_subscription(name).await? {
            Some(found) => found,
            None if !self.inner.shared.config.auto_create_subscriptions => return Err(not_found()),
            None => match topic.create_subscription(name).await {
                Ok(created) => {
                    info!(subscription = name, topic = topic.name(), "created subscription");
                    self.inner
                        .shared
                        .bus
                        .publish(self.event(EventKind::SubscriptionCreated));
                    created
                }
                Err(TransportError::AlreadyExists(_)) => {
                    topic.find_subscription(name).await?.ok_or_else(not_found)?
                }
                Err(e) => return Err(e.into()),
            },
        };

        if subscription.topic_name() != topic.name() {
            return Err(Error::SubscriptionTopicNameMismatch {
                subscription: name.to_string(),
                expected: topic.name().to_string(),
                actual: subscription.topic_name().to_string(),
            });
        }
        Ok(subscription)
    }

    /// Updates only the policy fields that differ from the configured ones.
    async fn reconcile_policies(&self, subscription: &SubscriptionRef) -> Result<(), Error> {
        let shared = &self.inner.shared;
        let auto = &shared.config.auto_retry;

        let retry = Some(auto.retry_policy());
        if subscription.retry_policy() != retry {
            subscription.set_retry_policy(retry).await?;
            debug!(subscription = self.subscription_name(), "updated retry policy");
        }

        if let Some(name) = auto.dead_letter_topic_name.as_deref() {
            let dead_letter = EventName::new(shared.config.namespace(), name);
            let topic = shared.registry.resolve(&dead_letter).await?;
            let desired = Some(DeadLetterPolicy {
                topic: topic.name().to_string(),
                max_delivery_attempts: auto.max_attempts,
            });
            if subscription.dead_letter_policy() != desired {
                subscription.set_dead_letter_policy(desired).await?;
                debug!(
                    subscription = self.subscription_name(),
                    dead_letter_topic = topic.name(),
                    "updated dead-letter policy"
                );
            }
        }
        Ok(())
    }

    /// Starts pulling. Idempotent while running.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`Error::NoSubscriber`] if [`Listener::register`] never succeeded.
    pub fn start(&self) -> Result<(), Error> {
        let mut st = self.inner.state.lock();
        if st.phase == ListenerState::Running {
            return Ok(());
        }
        let (Some(subscription), Some(settings)) = (st.subscription.clone(), st.settings) else {
            return Err(Error::NoSubscriber {
                event_name: self.event_name().to_string(),
            });
        };

        st.runs.retain(|run| !run.finished());
        let run = self.spawn_run(subscription, settings);
        st.runs.push(run);
        st.phase = ListenerState::Running;
        drop(st);

        info!(
            event_name = self.event_name(),
            subscription = self.subscription_name(),
            "listener started"
        );
        self.inner
            .shared
            .bus
            .publish(self.event(EventKind::ListenerStarted));
        Ok(())
    }

    fn spawn_run(&self, subscription: SubscriptionRef, settings: ListenerSettings) -> Run {
        let shared = &self.inner.shared;
        let run = Run {
            stop: CancellationToken::new(),
            kill: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        let subscription_name: Arc<str> = Arc::from(self.subscription_name());

        let pipeline = Arc::new(Pipeline {
            event_name: self.inner.event_name.clone(),
            subscription: Arc::clone(&subscription_name),
            handler: Arc::clone(&self.inner.handler),
            serializer: Arc::clone(&shared.serializer),
            inbound: Arc::clone(&shared.inbound),
            error_handlers: Arc::clone(&shared.error_handlers),
            retry: shared.config.auto_retry.backoff(),
            bus: shared.bus.clone(),
        });

        let (acks, rx) = mpsc::unbounded_channel::<Disposition>();
        Settler {
            event_name: self.inner.event_name.clone(),
            subscription: subscription_name,
            bus: shared.bus.clone(),
        }
        .spawn(settings.push_threads, rx, &run.tracker);

        let permits = Arc::new(Semaphore::new(settings.callback_threads));
        for _ in 0..settings.streams {
            let stream = Stream {
                subscription: Arc::clone(&subscription),
                settings,
                pipeline: Arc::clone(&pipeline),
                acks: acks.clone(),
                permits: Arc::clone(&permits),
                inflight: Arc::clone(&self.inner.inflight),
                stop: run.stop.clone(),
                kill: run.kill.clone(),
                tracker: run.tracker.clone(),
            };
            run.tracker.spawn(stream.pull_loop());
        }
        // spawning stays possible after close; wait() only needs the set to empty
        run.tracker.close();
        run
    }

    /// Stops pulling new messages. Running callbacks are not interrupted.
    pub fn stop(&self) {
        let mut st = self.inner.state.lock();
        if st.phase != ListenerState::Running {
            return;
        }
        for run in &st.runs {
            run.stop.cancel();
        }
        st.phase = ListenerState::Stopped;
        drop(st);

        info!(
            event_name = self.event_name(),
            subscription = self.subscription_name(),
            "listener stopped"
        );
        self.inner
            .shared
            .bus
            .publish(self.event(EventKind::ListenerStopped));
    }

    /// Resolves once every callback and disposition of every run has finished.
    ///
    /// On a running listener this waits until it is stopped and drained.
    pub async fn wait(&self) {
        let trackers: Vec<TaskTracker> = self
            .inner
            .state
            .lock()
            .runs
            .iter()
            .map(|run| run.tracker.clone())
            .collect();
        for tracker in trackers {
            tracker.wait().await;
        }
    }

    /// [`Listener::wait`] bounded by `timeout`; returns `false` on timeout.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// `stop()` then `wait()`.
    pub async fn shutdown(&self) {
        self.stop();
        self.wait().await;
    }

    /// Stops and aborts running callbacks; their messages are rejected.
    pub fn kill(&self) {
        self.stop();
        let st = self.inner.state.lock();
        for run in &st.runs {
            run.kill.cancel();
        }
        drop(st);
        warn!(subscription = self.subscription_name(), "listener killed");
    }

    /// One-line description for debug dumps.
    pub fn format(&self) -> String {
        let st = self.inner.state.lock();
        let mut line = format!(
            "{} <- {} [{}] in_flight={}",
            self.subscription_name(),
            self.event_name(),
            st.phase,
            self.inner.inflight.count()
        );
        if let Some(s) = st.settings {
            line.push_str(&format!(
                " streams={} callback_threads={} push_threads={} deadline={}s",
                s.streams,
                s.callback_threads,
                s.push_threads,
                s.deadline.as_secs()
            ));
        }
        line
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_event_name(&self.inner.event_name)
            .with_subscription(&self.inner.subscription_name)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("event_name", &self.event_name())
            .field("subscription", &self.subscription_name())
            .field("state", &self.state())
            .finish()
    }
}

/// One pull loop.
struct Stream {
    subscription: SubscriptionRef,
    settings: ListenerSettings,
    pipeline: Arc<Pipeline>,
    acks: mpsc::UnboundedSender<Disposition>,
    permits: Arc<Semaphore>,
    inflight: Arc<InFlight>,
    stop: CancellationToken,
    kill: CancellationToken,
    tracker: TaskTracker,
}

impl Stream {
    async fn pull_loop(self) {
        loop {
            let pulled = tokio::select! {
                _ = self.stop.cancelled() => break,
                res = self.subscription.pull(self.settings.max_messages, self.settings.deadline) => res,
            };

            let messages = match pulled {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(subscription = self.subscription.name(), error = %e, "pull failed");
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(PULL_RETRY_DELAY) => continue,
                    }
                }
            };

            for message in messages {
                let delivery = Delivery::new(message, self.inflight.enter(), self.acks.clone());
                if self.stop.is_cancelled() {
                    delivery.release();
                    continue;
                }
                let permit = tokio::select! {
                    _ = self.stop.cancelled() => {
                        delivery.release();
                        continue;
                    }
                    permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            delivery.release();
                            continue;
                        }
                    },
                };

                let pipeline = Arc::clone(&self.pipeline);
                let kill = self.kill.clone();
                self.tracker.spawn(async move {
                    let _permit = permit;
                    tokio::select! {
                        _ = kill.cancelled() => {}
                        _ = pipeline.handle(delivery) => {}
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapter::Adapter;
    use crate::core::config::{AutoRetryConfig, Config};
    use crate::handlers::HandlerFn;
    use crate::transport::{MemoryTransport, RetryPolicy, Subscription};

    fn build(transport: &MemoryTransport, config: Config) -> Adapter {
        Adapter::builder(Arc::new(transport.clone()))
            .config(config)
            .build()
            .unwrap()
    }

    fn listener(adapter: &Adapter, event: &str, sub: &str) -> Listener {
        Listener::new(
            adapter.namespaced(event),
            adapter.namespaced(sub),
            SubscribeOptions::default(),
            HandlerFn::arc(|_p, _m| async { Ok(()) }),
            adapter.shared(),
        )
    }

    #[tokio::test]
    async fn start_before_register_has_no_subscriber() {
        let transport = MemoryTransport::new();
        let adapter = build(&transport, Config::default());
        let l = listener(&adapter, "user.deleted", "audit");

        assert_eq!(l.state(), ListenerState::Unregistered);
        assert!(matches!(l.start(), Err(Error::NoSubscriber { .. })));
        assert!(!l.is_started());
    }

    #[tokio::test]
    async fn missing_resources_are_reported_without_auto_create() {
        let transport = MemoryTransport::new();
        let adapter = build(&transport, Config::default());

        let err = listener(&adapter, "user.deleted", "audit").register().await.unwrap_err();
        assert!(matches!(err, Error::TopicNotFound { .. }));

        transport.seed_topic("user.deleted");
        let err = listener(&adapter, "user.deleted", "audit").register().await.unwrap_err();
        assert!(matches!(err, Error::SubscriptionNotFound { .. }));
        assert_eq!(transport.topic_creations(), 0);
    }

    #[tokio::test]
    async fn subscription_bound_to_another_topic_is_rejected() {
        let transport = MemoryTransport::new();
        transport.seed_subscription("user.created", "audit");
        transport.seed_topic("user.deleted");
        let adapter = build(&transport, Config::default());

        let err = listener(&adapter, "user.deleted", "audit").register().await.unwrap_err();
        match err {
            Error::SubscriptionTopicNameMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, "user.deleted");
                assert_eq!(actual, "user.created");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn policies_are_reconciled_only_when_they_differ() {
        let transport = MemoryTransport::new();
        let config = Config {
            namespace: Some("test".into()),
            auto_create_topics: true,
            auto_create_subscriptions: true,
            auto_retry: AutoRetryConfig {
                enabled: true,
                max_attempts: 7,
                dead_letter_topic_name: Some("dead".into()),
                ..AutoRetryConfig::default()
            },
            ..Config::default()
        };
        let adapter = build(&transport, config.clone());
        listener(&adapter, "user.deleted", "audit").register().await.unwrap();

        let sub = transport.subscription("test.audit").unwrap();
        assert_eq!(
            sub.retry_policy(),
            Some(RetryPolicy {
                minimum_backoff: Duration::from_secs(15),
                maximum_backoff: Duration::from_secs(600),
            })
        );
        assert_eq!(
            sub.dead_letter_policy(),
            Some(DeadLetterPolicy {
                topic: "test.dead".into(),
                max_delivery_attempts: 7,
            })
        );
        assert_eq!(sub.stats().policy_updates, 2);
        assert!(transport.topic("test.dead").is_some());

        // a second process with the same configuration changes nothing
        let again = build(&transport, config);
        listener(&again, "user.deleted", "audit").register().await.unwrap();
        assert_eq!(sub.stats().policy_updates, 2);
    }

    #[tokio::test]
    async fn lifecycle_and_format() {
        let transport = MemoryTransport::new();
        let adapter = build(
            &transport,
            Config {
                auto_create_topics: true,
                auto_create_subscriptions: true,
                ..Config::default()
            },
        );
        let l = listener(&adapter, "user.deleted", "audit");
        l.register().await.unwrap();
        assert_eq!(l.state(), ListenerState::Registered);

        l.start().unwrap();
        l.start().unwrap();
        assert!(l.is_started());
        assert!(l.format().starts_with("audit <- user.deleted [running] in_flight=0"));

        l.stop();
        assert_eq!(l.state(), ListenerState::Stopped);
        assert!(l.wait_timeout(Duration::from_secs(2)).await);
        assert!(l.is_drained());

        l.start().unwrap();
        assert!(l.is_started());
        l.shutdown().await;
        assert_eq!(l.state(), ListenerState::Stopped);
    }
}
