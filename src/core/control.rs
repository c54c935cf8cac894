//! # Control channel for the runner.
//!
//! Administrative operations reach the runner as [`Command`] values through a
//! bounded channel. [`Runner::drive`](crate::Runner::drive) executes them one at
//! a time, so pause / resume / shutdown never overlap while message delivery
//! stays concurrent.
//!
//! ```text
//! signals / admin code ──► ControlHandle::send ──► [mpsc] ──► Runner::drive (serial)
//! ```

use thiserror::Error;
use tokio::sync::mpsc;

/// Operation the runner performs on request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    /// Logs [`Runner::debug_info`](crate::Runner::debug_info).
    DebugDump,
    /// Graceful shutdown.
    Shutdown,
    /// Aborts in-flight callbacks.
    ForceShutdown,
}

/// Error returned when a command cannot be queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// The queue is full (`try_send` only).
    #[error("control queue is full")]
    Full,

    /// The runner is no longer driving commands.
    #[error("control channel is closed")]
    Closed,
}

impl ControlError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlError::Full => "control_full",
            ControlError::Closed => "control_closed",
        }
    }
}

/// Sending side of the control channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ControlHandle {
    tx: mpsc::Sender<Command>,
}

impl ControlHandle {
    /// Queues `cmd`, waiting for room.
    pub async fn send(&self, cmd: Command) -> Result<(), ControlError> {
        self.tx.send(cmd).await.map_err(|_| ControlError::Closed)
    }

    /// Queues `cmd` without waiting.
    pub fn try_send(&self, cmd: Command) -> Result<(), ControlError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ControlError::Full,
            mpsc::error::TrySendError::Closed(_) => ControlError::Closed,
        })
    }
}

/// Creates a control channel; capacity is clamped to at least 1.
pub fn channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ControlHandle { tx }, rx)
}
