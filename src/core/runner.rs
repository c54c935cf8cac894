//! # Runner: every listener of an adapter as one supervised unit.
//!
//! ## Graceful shutdown
//! ```text
//! gracefully_shutdown()
//!   1. shutting_down = true        → ready() turns false, start() is refused
//!   2. stop() every listener       → no new pulls
//!   3. sleep(shutdown_grace)
//!   4. adapter.flush_messages()    → buffered publishes sent
//!   5. wait() every listener       → bounded by drain_timeout (AllDrained / DrainExceeded)
//!   6. shutdown hooks, one by one  → failures and panics isolated
//!   7. shut_down = true
//! ```
//!
//! ## Rules
//! - Steps always run in this order; a drain timeout still runs the hooks
//!   before the error is returned.
//! - One caller runs the sequence; overlapping callers wait for it to finish.
//! - `force_shutdown()` kills every listener: running callbacks are aborted and
//!   their messages rejected.

use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{Notify, mpsc};
use tracing::{error, info, warn};

use crate::core::adapter::Adapter;
use crate::core::control::Command;
use crate::error::{Error, RuntimeError, panic_message};
use crate::events::{Event, EventKind};

struct RunnerInner {
    adapter: Adapter,
    shutting_down: AtomicBool,
    /// Set by the one caller that runs the graceful sequence.
    claimed: AtomicBool,
    shut_down: AtomicBool,
    finished: Notify,
}

/// Supervises the listeners of one [`Adapter`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

impl Runner {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                adapter,
                shutting_down: AtomicBool::new(false),
                claimed: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                finished: Notify::new(),
            }),
        }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.inner.adapter
    }

    /// Starts every listener (idempotent per listener).
    ///
    /// # Errors
    /// [`Error::NoSubscriber`] if a listener was never registered.
    pub fn start(&self) -> Result<(), Error> {
        if self.is_shutting_down() {
            warn!("shutdown in progress, not starting listeners");
            return Ok(());
        }
        info!("Starting listeners");
        for listener in self.inner.adapter.listeners() {
            listener.start()?;
        }
        Ok(())
    }

    /// Stops pulling on every listener; running callbacks finish.
    pub fn stop(&self) {
        info!("Stopping listeners");
        for listener in self.inner.adapter.listeners() {
            listener.stop();
        }
    }

    pub fn pause(&self) {
        self.stop();
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.start()
    }

    /// Stops, drains and runs the shutdown hooks.
    ///
    /// Only the first call runs the sequence. Concurrent calls wait for it to
    /// complete and return `Ok(())`; calls after completion return at once.
    ///
    /// # Errors
    /// [`RuntimeError::DrainExceeded`] if listeners were still busy when
    /// `drain_timeout` elapsed. The hooks have run regardless.
    pub async fn gracefully_shutdown(&self) -> Result<(), RuntimeError> {
        if self
            .inner
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.wait_shut_down().await;
            return Ok(());
        }
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.inner
            .adapter
            .bus()
            .publish(Event::new(EventKind::ShutdownRequested));

        self.stop();
        info!("Gracefully shutting down runner");

        let grace = self.inner.adapter.config().shutdown_grace;
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        self.inner.adapter.flush_messages().await;
        let drained = self.drain().await;
        self.run_shutdown_hooks().await;

        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.finished.notify_waiters();
        info!("runner shut down");
        drained
    }

    /// Resolves once the graceful sequence has completed.
    async fn wait_shut_down(&self) {
        let finished = self.inner.finished.notified();
        tokio::pin!(finished);
        finished.as_mut().enable();
        if !self.is_shut_down() {
            finished.await;
        }
    }

    async fn drain(&self) -> Result<(), RuntimeError> {
        let adapter = &self.inner.adapter;
        let listeners = adapter.listeners();
        let wait_all = join_all(listeners.iter().map(|l| l.wait()));

        if let Some(limit) = adapter.config().drain_limit() {
            if tokio::time::timeout(limit, wait_all).await.is_err() {
                let busy: Vec<String> = listeners
                    .iter()
                    .filter(|l| !l.is_drained())
                    .map(|l| l.subscription_name().to_string())
                    .collect();
                warn!(?busy, timeout = ?limit, "listeners still busy after drain timeout");
                adapter
                    .bus()
                    .publish(Event::new(EventKind::DrainExceeded).with_reason(busy.join(", ")));
                return Err(RuntimeError::DrainExceeded {
                    timeout: limit,
                    busy,
                });
            }
        } else {
            wait_all.await;
        }

        adapter.bus().publish(Event::new(EventKind::AllDrained));
        Ok(())
    }

    async fn run_shutdown_hooks(&self) {
        let adapter = &self.inner.adapter;
        let hooks = adapter.shutdown_hooks();
        if hooks.is_empty() {
            return;
        }

        info!("Calling custom on_shutdown handler");
        for hook in hooks {
            let outcome = AssertUnwindSafe(hook.on_shutdown(adapter))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(&*panic)),
            };
            warn!("Shutdown handler failed ({failure})");
            adapter
                .bus()
                .publish(Event::new(EventKind::ShutdownHookFailed).with_reason(failure));
        }
    }

    /// Kills every listener; in-flight messages are rejected for redelivery.
    pub fn force_shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        error!("forcing shutdown, aborting in-flight callbacks");
        for listener in self.inner.adapter.listeners() {
            listener.kill();
        }
    }

    /// True iff every listener is running and no shutdown has begun.
    pub fn ready(&self) -> bool {
        !self.is_shutting_down() && self.inner.adapter.listeners().iter().all(|l| l.is_started())
    }

    /// Same as [`Runner::ready`].
    pub fn healthy(&self) -> bool {
        self.ready()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// True once [`Runner::gracefully_shutdown`] completed.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Terminal-friendly dump of listeners, topics and runtime state.
    pub fn debug_info(&self) -> String {
        let adapter = &self.inner.adapter;
        let listeners = adapter.listeners();
        let in_flight: usize = listeners.iter().map(|l| l.in_flight()).sum();
        let workers = tokio::runtime::Handle::try_current()
            .map(|h| h.metrics().num_workers().to_string())
            .unwrap_or_else(|_| "-".to_string());

        let mut out = String::from("╔══════ LISTENERS\n");
        for listener in &listeners {
            let _ = writeln!(out, "║ {}", listener.format());
        }
        out.push_str("║\n╠══════ TOPICS\n");
        for topic in adapter.topics() {
            let _ = writeln!(out, "║ {topic}");
        }
        out.push_str("║\n╠══════ GENERAL\n");
        let _ = writeln!(out, "║ ready?: {}", self.ready());
        let _ = writeln!(out, "║ healthy?: {}", self.healthy());
        let _ = writeln!(out, "║ shutting down?: {}", self.is_shutting_down());
        let _ = writeln!(out, "║ workers: {workers}");
        let _ = writeln!(out, "║ in flight: {in_flight}");
        out.push_str("╚══════\n");
        out
    }

    /// Executes control commands one at a time until a shutdown completes or
    /// every [`ControlHandle`](crate::ControlHandle) is dropped.
    ///
    /// A `Shutdown` runs the graceful sequence; a `ForceShutdown` arriving while
    /// it runs aborts the in-flight callbacks.
    pub async fn drive(&self, mut commands: mpsc::Receiver<Command>) -> Result<(), RuntimeError> {
        while let Some(cmd) = commands.recv().await {
            match cmd {
                Command::Start | Command::Resume => {
                    if let Err(e) = self.start() {
                        error!(error = %e, "failed to start listeners");
                    }
                }
                Command::Pause => self.pause(),
                Command::DebugDump => info!("\n{}", self.debug_info()),
                Command::ForceShutdown => {
                    self.force_shutdown();
                    return Ok(());
                }
                Command::Shutdown => {
                    let graceful = async {
                        let res = self.gracefully_shutdown().await;
                        if let Err(e) = &res {
                            error!(label = e.as_label(), "{}", e.as_message());
                        }
                        res
                    };
                    tokio::pin!(graceful);
                    loop {
                        tokio::select! {
                            res = &mut graceful => return res,
                            next = commands.recv() => match next {
                                Some(Command::ForceShutdown) => self.force_shutdown(),
                                Some(Command::DebugDump) => info!("\n{}", self.debug_info()),
                                Some(other) => warn!(command = ?other, "ignored during shutdown"),
                                None => return graceful.await,
                            },
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("shutting_down", &self.is_shutting_down())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    fn runner() -> Runner {
        let adapter = Adapter::builder(Arc::new(MemoryTransport::new()))
            .config(Config {
                auto_create_topics: true,
                auto_create_subscriptions: true,
                shutdown_grace: Duration::ZERO,
                ..Config::default()
            })
            .build()
            .unwrap();
        Runner::new(adapter)
    }

    #[tokio::test]
    async fn ready_follows_listener_state() {
        let runner = runner();
        runner
            .adapter()
            .subscribe("user.deleted", "audit", |_p, _m| async { Ok(()) })
            .await
            .unwrap();
        assert!(!runner.ready());

        runner.start().unwrap();
        assert!(runner.ready());
        assert!(runner.healthy());

        runner.pause();
        assert!(!runner.ready());
        runner.resume().unwrap();
        assert!(runner.ready());

        runner.gracefully_shutdown().await.unwrap();
        assert!(!runner.ready());
        assert!(runner.is_shut_down());

        runner.start().unwrap();
        assert!(!runner.ready());
    }

    #[tokio::test]
    async fn debug_info_lists_listeners() {
        let runner = runner();
        runner
            .adapter()
            .subscribe("user.deleted", "audit", |_p, _m| async { Ok(()) })
            .await
            .unwrap();

        let dump = runner.debug_info();
        assert!(dump.starts_with("╔══════ LISTENERS"));
        assert!(dump.contains("║ audit <- user.deleted [registered]"));
        assert!(dump.contains("║ user.deleted\n"));
        assert!(dump.contains("║ ready?: false"));
        assert!(dump.trim_end().ends_with("╚══════"));
    }

    #[tokio::test]
    async fn drive_runs_commands_until_shutdown() {
        let runner = runner();
        runner
            .adapter()
            .subscribe("user.deleted", "audit", |_p, _m| async { Ok(()) })
            .await
            .unwrap();

        let (handle, rx) = crate::core::control::channel(8);
        let driver = tokio::spawn({
            let runner = runner.clone();
            async move { runner.drive(rx).await }
        });

        handle.send(Command::Start).await.unwrap();
        handle.send(Command::DebugDump).await.unwrap();
        handle.send(Command::Shutdown).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(runner.is_shut_down());
    }
}
