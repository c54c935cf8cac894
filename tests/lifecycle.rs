mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pubsubvisor::{
    BoxError, Command, EventKind, MemoryTransport, Runner, RuntimeError, ShutdownFn,
    control_channel,
};
use serde_json::json;
use tokio::sync::mpsc;

use common::{builder, config, eventually};

#[tokio::test]
async fn graceful_shutdown_flushes_before_running_hooks() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let seen_at_hook = Arc::new(AtomicUsize::new(usize::MAX));
    let order = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&seen_at_hook);
    let probe = transport.clone();
    let first = Arc::clone(&order);
    let second = Arc::clone(&order);
    let third = Arc::clone(&order);
    let adapter = builder(&transport, config(None))
        .shutdown_hook(ShutdownFn::arc(move |_adapter| {
            let seen = Arc::clone(&seen);
            let probe = probe.clone();
            let order = Arc::clone(&first);
            async move {
                seen.store(probe.published("user.deleted").len(), Ordering::SeqCst);
                order.lock().push("count");
                Ok::<(), BoxError>(())
            }
        }))
        .shutdown_hook(ShutdownFn::arc(move |_adapter| {
            let order = Arc::clone(&second);
            async move {
                order.lock().push("fail");
                Err::<(), BoxError>("cleanup failed".into())
            }
        }))
        .shutdown_hook(ShutdownFn::arc(move |_adapter| {
            let order = Arc::clone(&third);
            async move {
                order.lock().push("last");
                Ok::<(), BoxError>(())
            }
        }))
        .build()?;
    let mut events = adapter.bus().subscribe();

    adapter
        .subscribe("user.deleted", "audit", |_p, _m| async { Ok(()) })
        .await?;
    let runner = Runner::new(adapter.clone());
    runner.start()?;
    assert!(runner.ready());

    for n in 0..3 {
        adapter.broadcast("user.deleted", &json!({ "user_id": n })).await?;
    }
    runner.gracefully_shutdown().await?;

    assert_eq!(seen_at_hook.load(Ordering::SeqCst), 3);
    assert_eq!(*order.lock(), vec!["count", "fail", "last"]);
    assert!(!runner.ready());
    assert!(!runner.healthy());
    assert!(runner.is_shut_down());

    let mut kinds = Vec::new();
    while let Ok(ev) = events.try_recv() {
        kinds.push(ev.kind);
    }
    let pos = |kind| kinds.iter().position(|k| *k == kind);
    assert!(pos(EventKind::ShutdownRequested).is_some());
    assert!(pos(EventKind::ShutdownRequested) < pos(EventKind::ListenerStopped));
    assert!(pos(EventKind::ListenerStopped) < pos(EventKind::MessagesFlushed));
    assert!(pos(EventKind::MessagesFlushed) < pos(EventKind::AllDrained));
    assert!(pos(EventKind::AllDrained) < pos(EventKind::ShutdownHookFailed));

    // a second call is a no-op
    runner.gracefully_shutdown().await?;
    assert_eq!(order.lock().len(), 3);
    Ok(())
}

#[tokio::test]
async fn overlapping_graceful_shutdowns_run_the_hooks_once() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);

    let mut cfg = config(None);
    cfg.shutdown_grace = Duration::from_millis(50);
    let adapter = builder(&transport, cfg)
        .shutdown_hook(ShutdownFn::arc(move |_adapter| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }))
        .build()?;
    adapter
        .subscribe("user.deleted", "audit", |_p, _m| async { Ok(()) })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    let other = runner.clone();
    let (first, second) = tokio::join!(runner.gracefully_shutdown(), other.gracefully_shutdown());
    first?;
    second?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(runner.is_shut_down());

    runner.gracefully_shutdown().await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn drain_timeout_reports_busy_listeners_and_still_runs_hooks() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let hook_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&hook_ran);

    let mut cfg = config(None);
    cfg.drain_timeout = Duration::from_millis(100);
    let adapter = builder(&transport, cfg)
        .shutdown_hook(ShutdownFn::arc(move |_adapter| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }))
        .build()?;

    let (started_tx, mut started) = mpsc::unbounded_channel::<()>();
    adapter
        .subscribe("user.deleted", "audit", move |_p, _m| {
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(());
                futures::future::pending::<()>().await;
                Ok(())
            }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    adapter.broadcast("user.deleted", &json!({})).await?;
    tokio::time::timeout(Duration::from_secs(5), started.recv()).await?;

    match runner.gracefully_shutdown().await {
        Err(RuntimeError::DrainExceeded { busy, timeout }) => {
            assert_eq!(busy, vec!["audit".to_string()]);
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected a drain timeout, got {other:?}"),
    }
    assert!(hook_ran.load(Ordering::SeqCst));

    // the stuck callback is aborted and its message handed back
    runner.force_shutdown();
    eventually("rejection of the aborted message", || {
        transport
            .subscription_stats("audit")
            .is_some_and(|s| s.nacked == 1)
    })
    .await;
    let listener = &adapter.listeners()[0];
    assert!(listener.wait_timeout(Duration::from_secs(5)).await);
    assert_eq!(listener.in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn paused_runner_stops_consuming_until_resumed() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, None);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    adapter
        .subscribe("user.deleted", "audit", move |_p, _m| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    runner.pause();
    assert!(!runner.ready());
    for listener in adapter.listeners() {
        assert!(listener.wait_timeout(Duration::from_secs(5)).await);
    }

    adapter.broadcast("user.deleted", &json!({})).await?;
    adapter.flush_messages().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(transport.subscription_stats("audit").map(|s| s.pending), Some(1));

    runner.resume()?;
    assert!(runner.ready());
    eventually("ack after resume", || {
        transport
            .subscription_stats("audit")
            .is_some_and(|s| s.acked == 1)
    })
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    runner.gracefully_shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn force_shutdown_command_interrupts_a_graceful_shutdown() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, None);

    let (started_tx, mut started) = mpsc::unbounded_channel::<()>();
    adapter
        .subscribe("user.deleted", "audit", move |_p, _m| {
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(());
                futures::future::pending::<()>().await;
                Ok(())
            }
        })
        .await?;

    let runner = Runner::new(adapter.clone());
    let (control, commands) = control_channel(8);
    let driver = tokio::spawn({
        let runner = runner.clone();
        async move { runner.drive(commands).await }
    });

    control.send(Command::Start).await?;
    adapter.broadcast("user.deleted", &json!({})).await?;
    tokio::time::timeout(Duration::from_secs(5), started.recv()).await?;

    control.send(Command::Shutdown).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(runner.is_shutting_down());
    assert!(!runner.is_shut_down());

    control.send(Command::ForceShutdown).await?;
    tokio::time::timeout(Duration::from_secs(5), driver).await???;

    assert!(runner.is_shut_down());
    assert_eq!(transport.subscription_stats("audit").map(|s| s.nacked), Some(1));
    Ok(())
}

#[tokio::test]
async fn debug_info_describes_running_listeners() -> anyhow::Result<()> {
    let transport = MemoryTransport::new();
    let adapter = common::adapter(&transport, Some("test"));
    adapter
        .subscribe("user.deleted", "audit", |_p, _m| async { Ok(()) })
        .await?;
    adapter
        .subscribe("user.created", "welcome", |_p, _m| async { Ok(()) })
        .await?;

    let runner = Runner::new(adapter.clone());
    runner.start()?;
    let dump = runner.debug_info();

    assert!(dump.contains("║ test.audit <- test.user.deleted [running]"));
    assert!(dump.contains("║ test.welcome <- test.user.created [running]"));
    assert!(dump.contains("╠══════ TOPICS\n║ test.user.created\n║ test.user.deleted\n"));
    assert!(dump.contains("║ ready?: true"));
    assert!(dump.contains("║ shutting down?: false"));

    runner.gracefully_shutdown().await?;
    Ok(())
}
