//! # OS signals → runner commands.
//!
//! [`forward_signals`] turns process signals into [`Command`]s on a
//! [`ControlHandle`]; it never acts on the runner directly.
//!
//! ## Unix
//! | signal                     | command                                        |
//! |----------------------------|------------------------------------------------|
//! | `SIGTSTP`                  | `Pause`                                        |
//! | `SIGCONT`                  | `Resume`                                       |
//! | `SIGTTIN`                  | `DebugDump`                                    |
//! | `SIGINT` `SIGTERM` `SIGQUIT` | `Shutdown`, then `ForceShutdown` on repeat   |
//!
//! ## Other platforms
//! Ctrl-C only: `Shutdown`, then `ForceShutdown` on repeat.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::control::{Command, ControlHandle};

/// Registers the signal listeners and spawns the forwarding task.
///
/// The task ends once the control channel is closed. Must be called from
/// within a tokio runtime.
///
/// # Errors
/// Fails if a signal listener cannot be registered.
#[cfg(unix)]
pub fn forward_signals(control: ControlHandle) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut tstp = signal(SignalKind::from_raw(libc::SIGTSTP))?;
    let mut cont = signal(SignalKind::from_raw(libc::SIGCONT))?;
    let mut ttin = signal(SignalKind::from_raw(libc::SIGTTIN))?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        let mut shutdowns = 0u32;
        loop {
            let cmd = tokio::select! {
                _ = tstp.recv() => Command::Pause,
                _ = cont.recv() => Command::Resume,
                _ = ttin.recv() => Command::DebugDump,
                _ = int.recv() => shutdown_command(&mut shutdowns),
                _ = term.recv() => shutdown_command(&mut shutdowns),
                _ = quit.recv() => shutdown_command(&mut shutdowns),
            };
            if !forward(&control, cmd).await {
                break;
            }
        }
    }))
}

/// Registers the Ctrl-C listener and spawns the forwarding task.
///
/// # Errors
/// Never fails on this platform; the signature matches the Unix variant.
#[cfg(not(unix))]
pub fn forward_signals(control: ControlHandle) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        let mut shutdowns = 0u32;
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c listener failed");
                break;
            }
            let cmd = shutdown_command(&mut shutdowns);
            if !forward(&control, cmd).await {
                break;
            }
        }
    }))
}

fn shutdown_command(count: &mut u32) -> Command {
    *count += 1;
    if *count == 1 {
        Command::Shutdown
    } else {
        Command::ForceShutdown
    }
}

async fn forward(control: &ControlHandle, cmd: Command) -> bool {
    debug!(command = ?cmd, "signal received");
    match control.send(cmd).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "runner no longer accepts commands, signal ignored");
            false
        }
    }
}
