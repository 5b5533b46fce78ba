//! Shutdown coordination for long-running loops.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cancellation request plus a confirmation handshake.
///
/// `trigger` is non-blocking and idempotent. The owning loop calls `confirm`
/// once it has exited (or drops the guard from `confirm_on_drop`), and every
/// `wait_confirmed` caller, including ones that arrive later, is released.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    confirmed: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (confirmed, _) = watch::channel(false);
        Self {
            token: CancellationToken::new(),
            confirmed: Arc::new(confirmed),
        }
    }

    /// Request shutdown.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token the loop selects on while sleeping.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Completes once shutdown is requested.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Mark the loop as exited.
    pub fn confirm(&self) {
        self.confirmed.send_replace(true);
    }

    pub fn is_confirmed(&self) -> bool {
        *self.confirmed.borrow()
    }

    /// Block until the loop has confirmed it exited.
    pub async fn wait_confirmed(&self) {
        let mut rx = self.confirmed.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Guard that confirms on drop, covering early returns and unwinding.
    pub fn confirm_on_drop(&self) -> ConfirmGuard {
        ConfirmGuard {
            shutdown: self.clone(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Confirms shutdown when dropped.
#[derive(Debug)]
pub struct ConfirmGuard {
    shutdown: Shutdown,
}

impl Drop for ConfirmGuard {
    fn drop(&mut self) {
        self.shutdown.confirm();
    }
}
