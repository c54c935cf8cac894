//! # Pipeline configuration.
//!
//! Provides [`Config`], an immutable value built once at process start and
//! shared by the adapter, every listener and the runner. Nothing here is global:
//! two adapters in one process can run with different configurations.
//!
//! Per-subscription overrides go through [`SubscribeOptions`], merged over
//! [`SubscriberDefaults`] into the listener's effective [`ListenerSettings`].
//!
//! ## Sentinel values
//! - `drain_timeout = 0s` → wait for in-flight messages forever
//! - `namespace = None` → event names are used as-is

use std::time::Duration;

use crate::policies::{BackoffJitter, RetryBackoff};
use crate::transport::RetryPolicy;

/// Defaults for every listener's consumption settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriberDefaults {
    /// Concurrent pull loops per listener.
    pub streams: usize,
    /// Handler callbacks allowed to run at once per listener.
    pub callback_threads: usize,
    /// Workers applying acks / nacks / deadline extensions per listener.
    pub push_threads: usize,
    /// Ack deadline requested for every pulled message.
    pub deadline: Duration,
    /// Messages requested per pull.
    pub max_messages: usize,
}

impl Default for SubscriberDefaults {
    fn default() -> Self {
        Self {
            streams: 4,
            callback_threads: 8,
            push_threads: 4,
            deadline: Duration::from_secs(60),
            max_messages: 10,
        }
    }
}

/// Backoff-on-failure and dead-lettering.
///
/// When `enabled`, failed messages get their ack deadline extended instead of
/// being rejected, and subscriptions get their retry / dead-letter policies
/// reconciled at registration time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutoRetryConfig {
    pub enabled: bool,
    /// Delivery attempts after which a failing message is acknowledged anyway.
    pub max_attempts: u32,
    /// Un-namespaced dead-letter topic name; resolved lazily.
    pub dead_letter_topic_name: Option<String>,
    pub minimum_backoff: Duration,
    pub maximum_backoff: Duration,
    pub jitter: BackoffJitter,
}

impl Default for AutoRetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 1200,
            dead_letter_topic_name: None,
            minimum_backoff: Duration::from_secs(15),
            maximum_backoff: Duration::from_secs(600),
            jitter: BackoffJitter::Smear,
        }
    }
}

impl AutoRetryConfig {
    /// Backoff calculator, or `None` when auto-retry is disabled.
    pub fn backoff(&self) -> Option<RetryBackoff> {
        self.enabled.then(|| RetryBackoff {
            minimum: self.minimum_backoff,
            maximum: self.maximum_backoff,
            max_attempts: self.max_attempts,
            jitter: self.jitter,
        })
    }

    /// Retry policy the subscriptions should carry.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            minimum_backoff: self.minimum_backoff,
            maximum_backoff: self.maximum_backoff,
        }
    }
}

/// Configuration shared by the adapter, listeners and runner.
///
/// All fields are public. Prefer the helper accessors to sprinkling sentinel
/// checks across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Prefix applied once to every event and subscription name (`<ns>.<name>`).
    pub namespace: Option<String>,
    pub subscriber: SubscriberDefaults,
    /// Create missing topics instead of failing with `TopicNotFound`.
    pub auto_create_topics: bool,
    /// Create missing subscriptions instead of failing with `SubscriptionNotFound`.
    pub auto_create_subscriptions: bool,
    pub auto_retry: AutoRetryConfig,
    /// Pause between stopping listeners and flushing publishes during graceful shutdown.
    pub shutdown_grace: Duration,
    /// Upper bound for waiting on in-flight messages during graceful shutdown.
    ///
    /// `Duration::ZERO` = wait forever.
    pub drain_timeout: Duration,
    /// Capacity of the runtime event bus (min 1).
    pub bus_capacity: usize,
    /// Built-in inbound interceptors, outermost first.
    pub inbound_middleware: Vec<String>,
    /// Built-in outbound interceptors, outermost first.
    pub outbound_middleware: Vec<String>,
}

impl Default for Config {
    /// - no namespace, no auto-creation, auto-retry disabled
    /// - `shutdown_grace = 2s`, `drain_timeout = 0` (forever)
    /// - inbound middleware `["logging"]`, no outbound middleware
    fn default() -> Self {
        Self {
            namespace: None,
            subscriber: SubscriberDefaults::default(),
            auto_create_topics: false,
            auto_create_subscriptions: false,
            auto_retry: AutoRetryConfig::default(),
            shutdown_grace: Duration::from_secs(2),
            drain_timeout: Duration::ZERO,
            bus_capacity: 1024,
            inbound_middleware: vec!["logging".to_string()],
            outbound_middleware: Vec::new(),
        }
    }
}

impl Config {
    /// Returns the drain timeout as an `Option` (`None` = wait forever).
    #[inline]
    pub fn drain_limit(&self) -> Option<Duration> {
        if self.drain_timeout == Duration::ZERO {
            None
        } else {
            Some(self.drain_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Namespace, ignoring an empty string.
    #[inline]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

/// Per-subscription overrides of [`SubscriberDefaults`]; `None` keeps the default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub streams: Option<usize>,
    pub callback_threads: Option<usize>,
    pub push_threads: Option<usize>,
    pub deadline: Option<Duration>,
    pub max_messages: Option<usize>,
}

impl SubscribeOptions {
    pub fn with_streams(mut self, n: usize) -> Self {
        self.streams = Some(n);
        self
    }

    pub fn with_callback_threads(mut self, n: usize) -> Self {
        self.callback_threads = Some(n);
        self
    }

    pub fn with_push_threads(mut self, n: usize) -> Self {
        self.push_threads = Some(n);
        self
    }

    pub fn with_deadline(mut self, d: Duration) -> Self {
        self.deadline = Some(d);
        self
    }

    pub fn with_max_messages(mut self, n: usize) -> Self {
        self.max_messages = Some(n);
        self
    }
}

/// Effective consumption settings of one listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerSettings {
    pub streams: usize,
    pub callback_threads: usize,
    pub push_threads: usize,
    pub deadline: Duration,
    pub max_messages: usize,
}

impl ListenerSettings {
    /// Overrides win over defaults; counts are clamped to at least 1.
    pub fn merge(defaults: &SubscriberDefaults, overrides: &SubscribeOptions) -> Self {
        Self {
            streams: overrides.streams.unwrap_or(defaults.streams).max(1),
            callback_threads: overrides
                .callback_threads
                .unwrap_or(defaults.callback_threads)
                .max(1),
            push_threads: overrides.push_threads.unwrap_or(defaults.push_threads).max(1),
            deadline: overrides.deadline.unwrap_or(defaults.deadline),
            max_messages: overrides.max_messages.unwrap_or(defaults.max_messages).max(1),
        }
    }
}
