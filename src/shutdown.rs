//! Shutdown coordination.
//!
//! The interrupt side only flips a flag and wakes the accept loop. It never
//! touches the histogram or writes output. The server observes the flag at
//! one safe point: before accepting the next connection, or while it is
//! parked waiting for one. A connection that is already in flight always
//! runs to completion first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

/// Cloneable shutdown flag shared between the interrupt listener and the
/// server loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns false if it was already requested.
    pub fn trigger(&self) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Whether shutdown has been requested. Never cleared once set.
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested.
    ///
    /// Returns immediately if it already was.
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a trigger in between is not lost.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

/// Spawn a task that triggers `shutdown` on SIGINT (and SIGTERM on Unix).
pub fn listen_for_interrupt(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match wait_for_signal().await {
                Ok(name) => {
                    if shutdown.trigger() {
                        info!(signal = name, "Interrupt received, stopping after current connection");
                    } else {
                        debug!(signal = name, "Interrupt received, shutdown already in progress");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for interrupt signals");
                    return;
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
