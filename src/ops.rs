//! Cancellable handles for spawned operations.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to a spawned asynchronous operation.
///
/// Cancelling after completion is a no-op; cancelling before completion
/// prevents the operation's remaining work (and any completion logic in
/// the spawned future) from running. Dropping the handle detaches the
/// task without cancelling it.
#[derive(Debug)]
pub struct Cancelable<T> {
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Cancelable<T> {
    /// Spawn `future` on the runtime and wrap its handle.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Request cancellation. Safe to call at any time, from any thread.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the operation has run to completion or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the operation. Returns `None` if it was cancelled (or if
    /// it panicked; the panic is logged, not resumed).
    pub async fn join(self) -> Option<T> {
        match self.handle.await {
            Ok(value) => Some(value),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                warn!("spawned operation panicked: {}", e);
                None
            }
        }
    }
}

impl<T: Send + 'static> Cancelable<Result<T, crate::error::TrustError>> {
    /// Wait for a fallible operation, mapping cancellation to
    /// [`crate::error::TrustError::Cancelled`].
    pub async fn join_result(self) -> Result<T, crate::error::TrustError> {
        self.join()
            .await
            .unwrap_or(Err(crate::error::TrustError::Cancelled))
    }
}
