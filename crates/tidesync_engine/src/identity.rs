//! Device identity provider.

use crate::config::DEVICE_ID_KEY;
use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use rand::RngCore;
use std::fmt::Write as _;
use std::sync::Arc;
use tidesync_storage::StateStore;
use tokio::sync::Mutex;
use tracing::info;

/// Number of random bytes in a device identity.
const DEVICE_ID_BYTES: usize = 16;

/// Produces and persists the stable identity of this installation.
///
/// The identity tags every remote write (`syncedBy`) so a device can
/// recognize its own writes when they echo back. It is generated once from
/// the OS entropy source, persisted under [`DEVICE_ID_KEY`] and never
/// rotated, except by [`DeviceIdentity::reset`].
pub struct DeviceIdentity {
    state: Arc<dyn StateStore>,
    cached: RwLock<Option<String>>,
    init: Mutex<()>,
}

impl DeviceIdentity {
    /// Creates a provider backed by `state`.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self {
            state,
            cached: RwLock::new(None),
            init: Mutex::new(()),
        }
    }

    /// Returns the device identity, generating and persisting it on first use.
    ///
    /// # Errors
    ///
    /// Fails if the state store is unavailable or holds an unreadable
    /// identity. Both are fatal to the engine.
    pub async fn device_id(&self) -> SyncResult<String> {
        if let Some(id) = self.cached() {
            return Ok(id);
        }

        let _guard = self.init.lock().await;
        if let Some(id) = self.cached() {
            return Ok(id);
        }

        let id = match self.state.get(DEVICE_ID_KEY).await? {
            Some(bytes) => String::from_utf8(bytes)
                .ok()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| SyncError::Identity("stored device identity is unreadable".into()))?,
            None => {
                let id = generate();
                self.state.set(DEVICE_ID_KEY, id.as_bytes()).await?;
                info!(device_id = %id, "generated device identity");
                id
            }
        };

        *self.cached.write() = Some(id.clone());
        Ok(id)
    }

    /// Returns the identity if it has already been loaded.
    pub fn cached(&self) -> Option<String> {
        self.cached.read().clone()
    }

    /// Forgets the identity. The next call to [`DeviceIdentity::device_id`]
    /// generates a new one.
    pub async fn reset(&self) -> SyncResult<()> {
        let _guard = self.init.lock().await;
        self.state.remove(DEVICE_ID_KEY).await?;
        *self.cached.write() = None;
        Ok(())
    }
}

fn generate() -> String {
    let mut bytes = [0u8; DEVICE_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(DEVICE_ID_BYTES * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
