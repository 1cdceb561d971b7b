//! Signal handling for graceful shutdown.
//!
//! A [`ShutdownToken`] is passed explicitly to the monitor loop. SIGINT and
//! SIGTERM cancel it through a [`ShutdownGuard`]; code and tests can cancel it
//! directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{info, warn};

/// A token that can be shared across tasks to request and observe shutdown.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Resolve once the token has been cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Listens for SIGINT/SIGTERM and cancels the given token.
pub struct ShutdownGuard {
    handle: tokio::task::JoinHandle<()>,
}

impl ShutdownGuard {
    /// Spawn the signal listener.
    ///
    /// If handlers cannot be registered (e.g., in restricted environments),
    /// the guard is still created but signals will not cancel the token.
    pub fn new(token: ShutdownToken) -> Self {
        let handle = tokio::spawn(async move {
            let sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Failed to register SIGINT handler: {}", e);
                    None
                }
            };

            let sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    None
                }
            };

            match (sigint, sigterm) {
                (Some(mut int), Some(mut term)) => {
                    tokio::select! {
                        _ = int.recv() => info!("Received SIGINT, initiating graceful shutdown..."),
                        _ = term.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
                        _ = token.cancelled() => return,
                    }
                }
                (Some(mut int), None) => {
                    tokio::select! {
                        _ = int.recv() => info!("Received SIGINT, initiating graceful shutdown..."),
                        _ = token.cancelled() => return,
                    }
                }
                (None, Some(mut term)) => {
                    tokio::select! {
                        _ = term.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
                        _ = token.cancelled() => return,
                    }
                }
                (None, None) => {
                    warn!("No signal handlers registered - graceful shutdown disabled");
                    return;
                }
            }

            token.cancel();
        });

        Self { handle }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
