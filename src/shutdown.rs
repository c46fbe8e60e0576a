//! Stop requests for a running archive.
//!
//! `main` creates one [`ShutdownCoordinator`], triggers it on Ctrl+C and
//! passes it down to the orchestrator, the worker pool, the media resolver
//! and every retry loop. After a request no new item starts, backoff sleeps
//! are cut short and the batch in flight gets no completion marker.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// One-way stop flag observable from sync and async code
#[derive(Debug)]
pub struct ShutdownCoordinator {
    stop: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    /// Coordinator with no stop requested
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self { stop }
    }

    /// New coordinator behind an [`Arc`]
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Flip the flag; repeated calls are no-ops
    pub fn request_shutdown(&self) {
        self.stop.send_if_modified(|stopped| !std::mem::replace(stopped, true));
    }

    /// Whether a stop has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once a stop has been requested, immediately if it already was
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.stop.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Whether an optional handle has been triggered
pub fn is_requested(shutdown: Option<&SharedShutdown>) -> bool {
    shutdown.is_some_and(|s| s.is_shutdown_requested())
}
