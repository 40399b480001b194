//! Remote realtime store abstraction.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with the current value at a subscribed path.
///
/// `None` means nothing is stored at the path.
pub type ChangeCallback = Arc<dyn Fn(Option<Json>) + Send + Sync>;

/// Handle to a live remote subscription.
///
/// Dropping the handle cancels the subscription.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    /// Creates a handle that runs `cancel` once when the subscription ends.
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Ends the subscription.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A hierarchical key-value store with change subscriptions.
///
/// Paths are `/`-separated (`clients/c1`). Reading a collection path returns
/// an object keyed by record id.
///
/// All calls except [`RemoteStore::probe_connected`] require an
/// authenticated session; the engine calls [`RemoteStore::ensure_session`]
/// first and implementations should establish one lazily if it is missing.
///
/// Failures should be reported as [`SyncError::Remote`](crate::SyncError::Remote)
/// with `retryable` set for transient conditions.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Establishes the authenticated session if it is absent.
    async fn ensure_session(&self) -> SyncResult<()>;

    /// Reads the value at `path`, or `None` if nothing is stored there.
    async fn read(&self, path: &str) -> SyncResult<Option<Json>>;

    /// Writes `value` at `path`, replacing what was there.
    async fn write(&self, path: &str, value: Json) -> SyncResult<()>;

    /// Removes everything at `path`. Removing a missing path succeeds.
    async fn delete(&self, path: &str) -> SyncResult<()>;

    /// Subscribes to changes at or below `path`.
    ///
    /// `on_change` receives the full value at `path` after every change and
    /// once right after subscribing.
    async fn subscribe(&self, path: &str, on_change: ChangeCallback)
        -> SyncResult<SubscriptionHandle>;

    /// Checks whether the store is actually reachable.
    async fn probe_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handle_cancels_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = SubscriptionHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_handle_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        {
            let _handle = SubscriptionHandle::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
