mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pubsubvisor::{
    Attributes, BoxError, Counters, Error, ErrorHandlerFn, EventKind, HandlerError, Inbound,
    MemoryTransport, Message, Middleware, Next, Runner, Topic, current_request_id,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use common::{builder, config, eventually, retrying};

#[tokio::test]
async fn broadcast_reaches_the_subscriber_and_is_acked_once() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, Some("test"));

    let (tx, mut rx) = mpsc::unbounded_channel::<(Value, Message)>();
    adapter
        .subscribe("user.deleted", "audit", move |payload, msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((payload, msg));
                Ok(())
            }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    let id = adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;

    let (payload, msg) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("handler called");
    assert_eq!(payload, json!({ "user_id": 1 }));
    assert_eq!(msg.event_name(), Some("test.user.deleted"));
    assert_eq!(msg.attribute("id"), Some(id.as_str()));

    eventually("ack", || {
        transport
            .subscription_stats("test.audit")
            .is_some_and(|s| s.acked == 1)
    })
    .await;
    runner.gracefully_shutdown().await?;

    let stats = transport.subscription_stats("test.audit").expect("subscription");
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.nacked, 0);
    assert_eq!(stats.outstanding, 0);
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn every_broadcast_gets_its_own_id() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, None);

    let a = adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;
    let b = adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;
    adapter.flush_messages().await;

    assert_ne!(a, b);
    let ids: Vec<_> = transport
        .published("user.deleted")
        .into_iter()
        .map(|m| m.attributes["id"].clone())
        .collect();
    assert_eq!(ids, vec![a, b]);
    Ok(())
}

#[tokio::test]
async fn missing_topic_fails_without_auto_create() {
    let transport = MemoryTransport::new();
    let mut cfg = config(None);
    cfg.auto_create_topics = false;
    let adapter = builder(&transport, cfg).build().unwrap();

    let err = adapter.broadcast("user.deleted", &json!({})).await.unwrap_err();
    assert!(matches!(err, Error::TopicNotFound { ref topic } if topic == "user.deleted"));
    assert!(transport.topic("user.deleted").is_none());
}

#[tokio::test]
async fn concurrent_broadcasts_create_the_topic_once() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, Some("test"));

    let sends = (0..16).map(|n| {
        let adapter = adapter.clone();
        tokio::spawn(async move { adapter.broadcast("user.deleted", &json!({ "n": n })).await })
    });
    for res in futures::future::join_all(sends).await {
        res??;
    }
    adapter.flush_messages().await;

    assert_eq!(transport.topic_creations(), 1);
    assert_eq!(transport.published("test.user.deleted").len(), 16);
    Ok(())
}

#[tokio::test]
async fn subscriber_id_bound_to_another_event_is_rejected() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, None);

    adapter
        .subscribe("user.created", "audit", |_p, _m| async { Ok(()) })
        .await?;
    let err = adapter
        .subscribe("user.deleted", "audit", |_p, _m| async { Ok(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SubscriptionTopicNameMismatch { .. }));
    assert_eq!(adapter.listeners().len(), 1);
    Ok(())
}

#[tokio::test]
async fn failure_without_auto_retry_is_redelivered() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let counters = Arc::new(Counters::new());
    let adapter = builder(&transport, config(None))
        .observer(counters.clone())
        .build()?;

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    adapter
        .subscribe("user.deleted", "audit", move |_p, _m| {
            let first = seen.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    return Err(HandlerError::fail("boom"));
                }
                Ok(())
            }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;

    eventually("redelivery and ack", || {
        transport
            .subscription_stats("audit")
            .is_some_and(|s| s.nacked == 1 && s.acked == 1)
    })
    .await;
    eventually("counters", || {
        let c = counters.snapshot();
        c.handler_failures == 1 && c.rejected == 1 && c.acked == 1
    })
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    runner.gracefully_shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn failure_with_auto_retry_extends_the_deadline() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let mut cfg = config(Some("test"));
    cfg.auto_retry = retrying(5);
    let adapter = builder(&transport, cfg).build()?;

    adapter
        .subscribe("user.deleted", "audit", |_p, _m| async {
            Err(HandlerError::fail("still broken"))
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;

    eventually("deadline extension", || {
        transport
            .subscription_stats("test.audit")
            .is_some_and(|s| !s.deadline_extensions.is_empty())
    })
    .await;
    runner.gracefully_shutdown().await?;

    let stats = transport.subscription_stats("test.audit").expect("subscription");
    // first attempt: 1 s minimum + 1⁴ s
    assert_eq!(stats.deadline_extensions, vec![Duration::from_secs(2)]);
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.nacked, 0);
    Ok(())
}

#[tokio::test]
async fn exhausted_retry_budget_acknowledges() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let mut cfg = config(Some("test"));
    cfg.auto_retry = retrying(1);
    let adapter = builder(&transport, cfg).build()?;
    let mut events = adapter.bus().subscribe();

    adapter
        .subscribe("user.deleted", "audit", |_p, _m| async {
            Err(HandlerError::fail("broken for good"))
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    adapter.broadcast("user.deleted", &json!({ "user_id": 1 })).await?;

    let exhausted = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(ev) if ev.kind == EventKind::RetryExhausted => break ev,
                Ok(_) => continue,
                Err(e) => panic!("bus closed: {e}"),
            }
        }
    })
    .await?;
    assert_eq!(exhausted.attempt, Some(1));
    assert_eq!(exhausted.subscription.as_deref(), Some("test.audit"));

    runner.gracefully_shutdown().await?;
    let stats = transport.subscription_stats("test.audit").expect("subscription");
    assert_eq!(stats.acked, 1);
    assert!(stats.deadline_extensions.is_empty());
    assert!(transport.published("test.dead").is_empty());
    Ok(())
}

#[tokio::test]
async fn error_handler_failures_do_not_change_the_outcome() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);

    let adapter = builder(&transport, config(None))
        .clear_error_handlers()
        .error_handler(ErrorHandlerFn::arc(
            |_: &HandlerError, _: &Message| -> Result<(), BoxError> { panic!("reporter crashed") },
        ))
        .error_handler(ErrorHandlerFn::arc(move |_: &HandlerError, _: &Message| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("sink unavailable".into())
        }))
        .build()?;

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    adapter
        .subscribe("user.deleted", "audit", move |_p, _m| {
            let first = seen.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    return Err(HandlerError::fail("boom"));
                }
                Ok(())
            }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    adapter.broadcast("user.deleted", &json!({})).await?;

    eventually("redelivery and ack", || {
        transport
            .subscription_stats("audit")
            .is_some_and(|s| s.nacked == 1 && s.acked == 1)
    })
    .await;
    assert_eq!(reported.load(Ordering::SeqCst), 1);

    runner.gracefully_shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn undecodable_payload_is_rejected() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, None);
    let called = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&called);

    adapter
        .subscribe("user.deleted", "audit", move |_p, _m| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await?;

    // bypass the adapter so the body is not JSON
    let topic = transport.topic("user.deleted").expect("topic");
    topic
        .publish_async(Bytes::from_static(b"not json"), Attributes::new(), None)
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    eventually("reject", || {
        transport
            .subscription_stats("audit")
            .is_some_and(|s| s.nacked >= 1)
    })
    .await;
    runner.force_shutdown();

    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert_eq!(transport.subscription_stats("audit").map(|s| s.acked), Some(0));
    Ok(())
}

struct Record {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Middleware<Inbound> for Record {
    async fn call(&self, req: &mut Inbound, next: Next<'_, Inbound>) -> Result<(), HandlerError> {
        self.log.lock().push(self.name);
        next.run(req).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[tokio::test]
async fn inbound_middleware_wraps_the_handler_in_order() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut cfg = config(None);
    cfg.inbound_middleware = vec!["logging".into(), "request_id".into()];
    cfg.outbound_middleware = vec!["request_id".into()];
    let adapter = builder(&transport, cfg)
        .append_inbound(Arc::new(Record {
            name: "inner",
            log: Arc::clone(&log),
        }))
        .prepend_inbound(Arc::new(Record {
            name: "outer",
            log: Arc::clone(&log),
        }))
        .build()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<(Option<String>, Option<String>)>();
    let handler_log = Arc::clone(&log);
    adapter
        .subscribe("user.deleted", "audit", move |_p, msg| {
            handler_log.lock().push("handler");
            let current = current_request_id();
            let stamped = msg.attribute("request_id").map(str::to_string);
            let tx = tx.clone();
            async move {
                let _ = tx.send((current, stamped));
                Ok(())
            }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    adapter.broadcast("user.deleted", &json!({})).await?;

    let (current, stamped) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("handler called");
    assert!(stamped.is_some());
    assert_eq!(current, stamped);
    assert_eq!(*log.lock(), vec!["outer", "inner", "handler"]);

    runner.gracefully_shutdown().await?;
    Ok(())
}
