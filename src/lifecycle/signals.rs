//! OS signal handling.
//!
//! # Signals
//! - SIGTERM/SIGINT → graceful stop of the consumer pool
//! - SIGUSR1 → pause every consumer (breakers forced open)
//! - SIGUSR2 → resume every consumer (breakers forced closed)
//! - SIGHUP → rotate the active notification endpoint
//!
//! Non-unix targets only see Ctrl-C.

use std::io;
use tracing::info;

/// Operator action requested through a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Shutdown,
    Pause,
    Resume,
    Failover,
}

#[cfg(unix)]
pub struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    user1: tokio::signal::unix::Signal,
    user2: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Register the handlers. Must run inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            user1: signal(SignalKind::user_defined1())?,
            user2: signal(SignalKind::user_defined2())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next signal.
    pub async fn recv(&mut self) -> ControlSignal {
        let (name, action) = tokio::select! {
            _ = self.interrupt.recv() => ("SIGINT", ControlSignal::Shutdown),
            _ = self.terminate.recv() => ("SIGTERM", ControlSignal::Shutdown),
            _ = self.user1.recv() => ("SIGUSR1", ControlSignal::Pause),
            _ = self.user2.recv() => ("SIGUSR2", ControlSignal::Resume),
            _ = self.hangup.recv() => ("SIGHUP", ControlSignal::Failover),
        };
        info!(signal = name, action = ?action, "Signal received");
        action
    }
}

#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    pub fn install() -> io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> ControlSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!(signal = "ctrl-c", "Signal received");
        ControlSignal::Shutdown
    }
}

impl std::fmt::Debug for SignalListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalListener").finish_non_exhaustive()
    }
}
