//! # Adapter: the publish path and the subscriber registry.
//!
//! [`Adapter`] is what application code talks to:
//! - [`Adapter::broadcast`] resolves the namespaced topic, serializes the payload,
//!   stamps `id` / `event_name` attributes and hands the publish to the
//!   transport through the outbound middleware. Fire-and-forget: the outcome
//!   only shows up in logs and runtime events.
//! - [`Adapter::subscribe`] creates and registers one [`Listener`] per
//!   `(event name, subscriber id)` pair.
//! - [`Adapter::flush_messages`] waits for every buffered publish.
//!
//! ## Architecture
//! ```text
//! broadcast(name, payload)
//!   ├─► EventName::new(namespace, name)
//!   ├─► TopicRegistry::resolve ──► find-or-create (single flight)
//!   ├─► Serializer::serialize
//!   └─► outbound Stack ──► Publish terminal ──► Topic::publish_async
//!                                                   └─► spawned: log + PublishSucceeded/Failed
//!
//! subscribe(name, id, handler)
//!   ├─► existing (name, id)? ──► same Listener (warn)
//!   └─► Listener::new ──► register() ──► remembered (Subscriber + Listener)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::builder::AdapterBuilder;
use crate::core::config::{Config, SubscribeOptions};
use crate::core::listener::Listener;
use crate::core::name::EventName;
use crate::core::registry::TopicRegistry;
use crate::error::{Error, HandlerError};
use crate::events::{Bus, Event, EventKind};
use crate::handlers::{ErrorHandlerRef, HandlerFn, HandlerRef, ShutdownHookRef};
use crate::middleware::{Inbound, Outbound, Stack, Terminal};
use crate::observers::ObserverSet;
use crate::serializer::Serializer;
use crate::transport::{ATTR_EVENT_NAME, ATTR_ID, Attributes, Message, TopicRef, Transport};

/// State shared by the adapter and every listener it created.
pub(crate) struct Shared {
    pub(crate) config: Arc<Config>,
    pub(crate) bus: Bus,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) inbound: Arc<Stack<Inbound>>,
    pub(crate) outbound: Arc<Stack<Outbound>>,
    pub(crate) error_handlers: Arc<[ErrorHandlerRef]>,
    pub(crate) registry: TopicRegistry,
}

/// Extra settings of one publish.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    /// Additional attributes; `id` and `event_name` are always set by the adapter.
    pub attributes: Attributes,
    /// Enables ordered delivery on the topic when set.
    pub ordering_key: Option<String>,
}

impl PublishOptions {
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }
}

/// A subscription request as the application made it.
#[derive(Clone)]
pub struct Subscriber {
    event_name: EventName,
    id: String,
    handler: HandlerRef,
}

impl Subscriber {
    /// Namespaced event name.
    pub fn event_name(&self) -> &str {
        self.event_name.as_str()
    }

    /// Subscriber id as given (before namespacing).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("event_name", &self.event_name)
            .field("id", &self.id)
            .finish()
    }
}

struct AdapterInner {
    shared: Arc<Shared>,
    subscribers: Mutex<Vec<Subscriber>>,
    listeners: Mutex<Vec<Listener>>,
    subscribing: tokio::sync::Mutex<()>,
    shutdown_hooks: Vec<ShutdownHookRef>,
}

/// Event delivery front-end over a pub/sub [`Transport`].
///
/// Cheap to clone; clones share topics, listeners and configuration.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use pubsubvisor::{Adapter, Config, MemoryTransport};
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), pubsubvisor::Error> {
/// let adapter = Adapter::builder(Arc::new(MemoryTransport::new()))
///     .config(Config { auto_create_topics: true, auto_create_subscriptions: true, ..Config::default() })
///     .build()?;
///
/// adapter
///     .subscribe("user.deleted", "audit", |payload, _msg| async move {
///         println!("deleted: {payload}");
///         Ok(())
///     })
///     .await?;
/// adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

impl Adapter {
    /// Starts building an adapter over `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> AdapterBuilder {
        AdapterBuilder::new(transport)
    }

    pub(crate) fn from_parts(
        shared: Shared,
        shutdown_hooks: Vec<ShutdownHookRef>,
        observers: Option<ObserverSet>,
    ) -> Self {
        if let Some(set) = observers {
            spawn_observer_pump(&shared.bus, set);
        }
        Self {
            inner: Arc::new(AdapterInner {
                shared: Arc::new(shared),
                subscribers: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                subscribing: tokio::sync::Mutex::new(()),
                shutdown_hooks,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.shared.config
    }

    /// Runtime event bus; subscribe to observe publishes and dispositions.
    pub fn bus(&self) -> &Bus {
        &self.inner.shared.bus
    }

    /// Applies the configured namespace to `name`.
    pub fn namespaced(&self, name: &str) -> EventName {
        EventName::new(self.config().namespace(), name)
    }

    /// Publishes `payload` under `event_name`.
    ///
    /// Returns the unique id stamped into the `id` attribute. The transport-side
    /// outcome is reported asynchronously (logs, `PublishSucceeded`/`PublishFailed`).
    ///
    /// # Errors
    /// - [`Error::TopicNotFound`] if the topic is missing and auto-creation is disabled
    /// - [`Error::Serialization`] if the payload cannot be serialized
    /// - [`Error::Middleware`] if an outbound interceptor failed
    pub async fn broadcast<T>(&self, event_name: &str, payload: &T) -> Result<String, Error>
    where
        T: Serialize + ?Sized,
    {
        self.broadcast_with(event_name, payload, PublishOptions::default())
            .await
    }

    /// [`Adapter::broadcast`] with extra attributes and an optional ordering key.
    pub async fn broadcast_with<T>(
        &self,
        event_name: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<String, Error>
    where
        T: Serialize + ?Sized,
    {
        let shared = &self.inner.shared;
        let name = self.namespaced(event_name);
        let topic = shared.registry.resolve(&name).await?;
        if options.ordering_key.is_some() && !topic.message_ordering() {
            topic.enable_message_ordering();
        }

        let value = serde_json::to_value(payload).map_err(|e| Error::Serialization(e.to_string()))?;
        let data = shared.serializer.serialize(&value)?;

        let id = Uuid::new_v4().to_string();
        let mut attributes = options.attributes;
        attributes.insert(ATTR_ID.to_string(), id.clone());
        attributes.insert(ATTR_EVENT_NAME.to_string(), name.to_string());

        let mut req = Outbound {
            event_name: name.to_string(),
            data,
            attributes,
            ordering_key: options.ordering_key,
        };
        let terminal = Publish {
            topic,
            shared: Arc::clone(shared),
        };
        shared
            .outbound
            .invoke(&mut req, &terminal)
            .await
            .map_err(Error::Middleware)?;
        Ok(id)
    }

    /// Subscribes a closure to `event_name` under subscriber id `id`.
    ///
    /// # Errors
    /// See [`Adapter::subscribe_with`].
    pub async fn subscribe<F, Fut>(&self, event_name: &str, id: &str, f: F) -> Result<Listener, Error>
    where
        F: Fn(Value, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe_with(event_name, id, SubscribeOptions::default(), HandlerFn::arc(f))
            .await
    }

    /// Subscribes any [`Handler`](crate::Handler) implementation.
    pub async fn subscribe_handler(
        &self,
        event_name: &str,
        id: &str,
        handler: HandlerRef,
    ) -> Result<Listener, Error> {
        self.subscribe_with(event_name, id, SubscribeOptions::default(), handler)
            .await
    }

    /// Creates and registers the listener for `(event_name, id)`.
    ///
    /// Subscribing the same pair again returns the existing listener; the new
    /// handler is ignored.
    ///
    /// # Errors
    /// - [`Error::TopicNotFound`] / [`Error::SubscriptionNotFound`]
    /// - [`Error::SubscriptionTopicNameMismatch`] when `id` is bound to another event
    pub async fn subscribe_with(
        &self,
        event_name: &str,
        id: &str,
        options: SubscribeOptions,
        handler: HandlerRef,
    ) -> Result<Listener, Error> {
        let _serial = self.inner.subscribing.lock().await;
        let name = self.namespaced(event_name);
        let subscription = self.namespaced(id);

        if let Some(existing) = self.find_listener(name.as_str(), subscription.as_str()) {
            warn!(
                event_name = %name,
                subscription = %subscription,
                "already subscribed, keeping the existing listener"
            );
            return Ok(existing);
        }

        let listener = Listener::new(
            name.clone(),
            subscription,
            options,
            Arc::clone(&handler),
            Arc::clone(&self.inner.shared),
        );
        listener.register().await?;

        self.inner.subscribers.lock().push(Subscriber {
            event_name: name,
            id: id.to_string(),
            handler,
        });
        self.inner.listeners.lock().push(listener.clone());
        Ok(listener)
    }

    fn find_listener(&self, event_name: &str, subscription: &str) -> Option<Listener> {
        self.inner
            .listeners
            .lock()
            .iter()
            .find(|l| l.event_name() == event_name && l.subscription_name() == subscription)
            .cloned()
    }

    /// Waits until every publish buffered so far has been sent or failed.
    pub async fn flush_messages(&self) {
        let topics = self.inner.shared.registry.published_topics();
        join_all(topics.iter().map(|topic| topic.flush())).await;
        debug!(topics = topics.len(), "flushed pending publishes");
        self.bus()
            .publish(Event::new(EventKind::MessagesFlushed).with_reason(topics.len().to_string()));
    }

    pub fn listeners(&self) -> Vec<Listener> {
        self.inner.listeners.lock().clone()
    }

    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.inner.subscribers.lock().clone()
    }

    /// Names of every topic resolved so far.
    pub fn topics(&self) -> Vec<String> {
        self.inner.shared.registry.names()
    }

    pub(crate) fn shutdown_hooks(&self) -> &[ShutdownHookRef] {
        &self.inner.shutdown_hooks
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.inner.shared)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("namespace", &self.config().namespace())
            .field("topics", &self.topics())
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

/// Hands one publish to the transport.
struct Publish {
    topic: TopicRef,
    shared: Arc<Shared>,
}

#[async_trait]
impl Terminal<Outbound> for Publish {
    async fn call(&self, req: &mut Outbound) -> Result<(), HandlerError> {
        let pending = self.topic.publish_async(
            req.data.clone(),
            req.attributes.clone(),
            req.ordering_key.clone(),
        );
        self.shared.registry.mark_published(self.topic.name());

        let bus = self.shared.bus.clone();
        let event_name = req.event_name.clone();
        let id = req.attributes.get(ATTR_ID).cloned().unwrap_or_default();
        tokio::spawn(async move {
            match pending.await {
                Ok(message_id) => {
                    info!(event_name = %event_name, id = %id, "Published event {message_id}");
                    bus.publish(
                        Event::new(EventKind::PublishSucceeded)
                            .with_event_name(event_name)
                            .with_message_id(message_id),
                    );
                }
                Err(e) => {
                    warn!(event_name = %event_name, id = %id, error = %e, "publish failed");
                    bus.publish(
                        Event::new(EventKind::PublishFailed)
                            .with_event_name(event_name)
                            .with_message_id(id)
                            .with_reason(e.to_string()),
                    );
                }
            }
        });
        Ok(())
    }
}

/// Forwards bus events to the observers until the bus is gone.
fn spawn_observer_pump(bus: &Bus, set: ObserverSet) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(Arc::new(ev)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer pump lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
}
