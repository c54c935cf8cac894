//! # Example: audit trail for deleted users
//!
//! Demonstrates:
//! - Subscribing a handler to `user.deleted` under the `audit` subscriber id
//! - Auto-retry with a dead-letter topic
//! - A custom error handler and a shutdown hook
//! - Driving the runner from OS signals (Ctrl-C shuts down, twice forces)
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example audit
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pubsubvisor::{
    Adapter, AutoRetryConfig, BoxError, Command, Config, Counters, ErrorHandlerFn, HandlerError,
    MemoryTransport, Message, Runner, ShutdownFn, control_channel, forward_signals,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut cfg = Config {
        namespace: Some("demo".into()),
        auto_create_topics: true,
        auto_create_subscriptions: true,
        shutdown_grace: Duration::from_millis(200),
        drain_timeout: Duration::from_secs(5),
        inbound_middleware: vec!["logging".into(), "request_id".into()],
        outbound_middleware: vec!["request_id".into()],
        ..Config::default()
    };
    cfg.auto_retry = AutoRetryConfig {
        enabled: true,
        max_attempts: 5,
        dead_letter_topic_name: Some("dead-letters".into()),
        ..AutoRetryConfig::default()
    };

    let counters = Arc::new(Counters::new());
    let adapter = Adapter::builder(Arc::new(MemoryTransport::new()))
        .config(cfg)
        .observer(counters.clone())
        .error_handler(ErrorHandlerFn::arc(
            |err: &HandlerError, msg: &Message| -> Result<(), BoxError> {
                println!(" ─► reporting failure of {}: {err}", msg.id());
                Ok(())
            },
        ))
        .shutdown_hook(ShutdownFn::arc({
            let counters = Arc::clone(&counters);
            move |_adapter| {
                let counters = Arc::clone(&counters);
                async move {
                    println!(" ─► final counters: {:?}", counters.snapshot());
                    Ok::<(), BoxError>(())
                }
            }
        }))
        .build()?;

    let deleted = Arc::new(AtomicU64::new(0));
    adapter
        .subscribe("user.deleted", "audit", {
            let deleted = Arc::clone(&deleted);
            move |payload, msg| {
                let deleted = Arc::clone(&deleted);
                async move {
                    let Some(user_id) = payload.get("user_id").and_then(|v| v.as_u64()) else {
                        return Err(HandlerError::fail("payload without user_id"));
                    };
                    let n = deleted.fetch_add(1, Ordering::Relaxed) + 1;
                    println!(" ─► audit #{n}: user {user_id} deleted (message {})", msg.id());
                    Ok(())
                }
            }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    let (control, commands) = control_channel(16);
    forward_signals(control.clone())?;
    let driver = tokio::spawn({
        let runner = runner.clone();
        async move { runner.drive(commands).await }
    });
    control.send(Command::Start).await?;

    for user_id in 1..=5 {
        adapter
            .broadcast("user.deleted", &json!({ "user_id": user_id }))
            .await?;
    }
    adapter.broadcast("user.deleted", &json!({ "name": "nobody" })).await?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    control.send(Command::DebugDump).await?;
    control.send(Command::Shutdown).await?;

    match driver.await? {
        Ok(()) => println!("runner stopped gracefully"),
        Err(e) => println!("runner stopped with error: {e}"),
    }
    Ok(())
}
