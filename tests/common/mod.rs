#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pubsubvisor::{AdapterBuilder, AutoRetryConfig, BackoffJitter, Config, MemoryTransport, Adapter};

/// Auto-creating config with one stream per listener and no shutdown grace.
pub fn config(namespace: Option<&str>) -> Config {
    let mut cfg = Config {
        namespace: namespace.map(str::to_string),
        auto_create_topics: true,
        auto_create_subscriptions: true,
        shutdown_grace: Duration::ZERO,
        ..Config::default()
    };
    cfg.subscriber.streams = 1;
    cfg.subscriber.push_threads = 1;
    cfg
}

/// Auto-retry with a dead-letter topic, so delivery attempts are reported.
pub fn retrying(max_attempts: u32) -> AutoRetryConfig {
    AutoRetryConfig {
        enabled: true,
        max_attempts,
        dead_letter_topic_name: Some("dead".into()),
        minimum_backoff: Duration::from_secs(1),
        maximum_backoff: Duration::from_secs(600),
        jitter: BackoffJitter::None,
    }
}

pub fn builder(transport: &MemoryTransport, config: Config) -> AdapterBuilder {
    Adapter::builder(Arc::new(transport.clone())).config(config)
}

pub fn adapter(transport: &MemoryTransport, namespace: Option<&str>) -> Adapter {
    builder(transport, config(namespace))
        .build()
        .expect("valid config")
}

/// Polls `check` until it holds; panics after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
