//! The engine context: owns every component and the background tasks.

use crate::bootstrap::{Bootstrapper, FullSyncReport};
use crate::config::{SyncConfig, LAST_FULL_SYNC_KEY};
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::driver::{PassOutcome, SyncDriver, SyncStats};
use crate::error::{SyncError, SyncResult};
use crate::identity::DeviceIdentity;
use crate::listener::ChangeListener;
use crate::queue::OperationQueue;
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidesync_codec::Record;
use tidesync_protocol::{Entity, Operation, OperationKind};
use tidesync_storage::{LocalStore, StateStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Snapshot of the engine state for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    /// Whether transmission is currently permitted.
    pub online: bool,
    /// Number of pending operations.
    pub queue_length: usize,
    /// Last time data reached the remote store, by a pass or a full sync.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Identity of this installation.
    pub device_id: String,
    /// When the last full sync finished.
    pub last_full_sync: Option<DateTime<Utc>>,
    /// Detailed connectivity state.
    pub connectivity: Connectivity,
    /// Cumulative transmission statistics.
    pub stats: SyncStats,
}

/// An offline-first sync engine.
///
/// Created with [`SyncEngine::start`], which loads the device identity and
/// the persisted queue and starts the background tasks: the reachability
/// prober, the transmission ticker and the reconnect watcher. The tasks
/// stop on [`SyncEngine::shutdown`] or when the engine is dropped.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tidesync_codec::{CollectionSchema, Record};
/// use tidesync_engine::{MemoryRemoteStore, SyncConfig, SyncEngine};
/// use tidesync_protocol::OperationKind;
/// use tidesync_storage::{InMemoryLocalStore, InMemoryStateStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = SyncEngine::start(
///     SyncConfig::new([CollectionSchema::new("clients")]),
///     Arc::new(InMemoryLocalStore::new()),
///     Arc::new(InMemoryStateStore::new()),
///     Arc::new(MemoryRemoteStore::new()),
/// )
/// .await?;
///
/// engine
///     .enqueue(OperationKind::Create, "clients", Record::new("c1").with("name", "Ali"))
///     .await?;
/// let status = engine.status().await?;
/// assert!(status.queue_length <= 1);
/// engine.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    state: Arc<dyn StateStore>,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<DeviceIdentity>,
    queue: Arc<OperationQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    driver: Arc<SyncDriver>,
    listener: ChangeListener,
    bootstrap: Bootstrapper,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl SyncEngine {
    /// Builds the engine and starts its background tasks.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the device identity or the persisted queue cannot be loaded.
    pub async fn start(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        state: Arc<dyn StateStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> SyncResult<Self> {
        let config = Arc::new(config);
        let identity = Arc::new(DeviceIdentity::new(Arc::clone(&state)));
        let device_id = identity.device_id().await?;
        let queue = Arc::new(OperationQueue::load(Arc::clone(&state)).await?);

        let connectivity = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&remote),
            config.probe_interval,
        ));
        let driver = Arc::new(SyncDriver::new(
            Arc::clone(&queue),
            Arc::clone(&remote),
            Arc::clone(&identity),
            Arc::clone(&connectivity),
            config.retry,
            config.push_interval,
        ));
        let listener = ChangeListener::new(
            Arc::clone(&remote),
            Arc::clone(&local),
            Arc::clone(&queue),
            Arc::clone(&identity),
            Arc::clone(&connectivity),
            Arc::clone(&config),
        );
        let bootstrap = Bootstrapper::new(
            Arc::clone(&config),
            local,
            Arc::clone(&state),
            Arc::clone(&remote),
            Arc::clone(&queue),
            Arc::clone(&identity),
            Arc::clone(&connectivity),
            Arc::clone(&driver),
        );

        let tasks = vec![
            driver.spawn_reconnect_watcher(),
            connectivity.spawn_prober(),
            driver.spawn_ticker(),
        ];

        info!(
            device_id = %device_id,
            pending = queue.len(),
            collections = config.collections.len(),
            "sync engine started"
        );

        Ok(Self {
            config,
            state,
            remote,
            identity,
            queue,
            connectivity,
            driver,
            listener,
            bootstrap,
            tasks: Mutex::new(tasks),
            shut_down: AtomicBool::new(false),
        })
    }

    fn check_running(&self) -> SyncResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            Err(SyncError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Records a mutation for replication.
    ///
    /// The operation is persisted before this returns. When online a pass is
    /// started in the background; offline the call succeeds all the same.
    ///
    /// # Errors
    ///
    /// Fails for unknown collections, invalid record ids, payloads that cannot
    /// be encoded and when the queue cannot be persisted. Never fails because
    /// of connectivity.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        collection: &str,
        payload: Record,
    ) -> SyncResult<Uuid> {
        self.check_running()?;
        if self.config.schema(collection).is_none() {
            return Err(SyncError::UnknownCollection(collection.to_owned()));
        }

        let device_id = self.identity.device_id().await?;
        let operation = Operation::new(kind, collection, payload, device_id)?;
        let id = operation.id;
        let outcome = self.queue.enqueue(operation).await?;
        debug!(op_id = %id, collection, kind = %kind, ?outcome, "operation enqueued");

        if self.connectivity.is_online() {
            self.driver.trigger();
        }
        Ok(id)
    }

    /// Enqueues a typed entity.
    ///
    /// Its collection must be configured, normally with
    /// [`SyncConfig::with_entity`] so incoming records decode with the
    /// entity's own timestamp schema.
    pub async fn enqueue_entity<E: Entity>(&self, kind: OperationKind, entity: &E) -> SyncResult<Uuid> {
        self.enqueue(kind, E::COLLECTION, entity.to_record()).await
    }

    /// Subscribes to remote changes of a collection. See [`ChangeListener`].
    pub async fn subscribe<F>(&self, collection: &str, callback: F) -> SyncResult<()>
    where
        F: Fn(Vec<Record>) + Send + Sync + 'static,
    {
        self.check_running()?;
        self.listener.subscribe(collection, Arc::new(callback)).await
    }

    /// Subscribes to remote changes as typed entities.
    ///
    /// Records that do not convert are logged and left out.
    pub async fn subscribe_entities<E, F>(&self, callback: F) -> SyncResult<()>
    where
        E: Entity + 'static,
        F: Fn(Vec<E>) + Send + Sync + 'static,
    {
        self.subscribe(E::COLLECTION, move |records: Vec<Record>| {
            let entities = records
                .iter()
                .filter_map(|record| match E::from_record(record) {
                    Ok(entity) => Some(entity),
                    Err(e) => {
                        warn!(collection = E::COLLECTION, record_id = record.id(), error = %e, "remote record does not convert");
                        None
                    }
                })
                .collect();
            callback(entities);
        })
        .await
    }

    /// Tears down one subscription, or all of them with `None`.
    pub fn unsubscribe(&self, collection: Option<&str>) -> usize {
        self.listener.unsubscribe(collection)
    }

    /// Runs the bootstrap / full-sync protocol. See [`Bootstrapper`].
    pub async fn full_sync(&self) -> SyncResult<FullSyncReport> {
        self.check_running()?;
        self.bootstrap.full_sync().await
    }

    /// Runs a transmission pass now and waits for it.
    pub async fn sync_now(&self) -> SyncResult<PassOutcome> {
        self.check_running()?;
        self.driver.run_pass().await
    }

    /// Reports a network change from the runtime.
    pub fn set_network_available(&self, available: bool) {
        if available {
            self.connectivity.network_online();
        } else {
            self.connectivity.network_offline();
        }
    }

    /// Returns a receiver of connectivity changes.
    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    /// Returns the device identity.
    pub async fn device_id(&self) -> SyncResult<String> {
        self.identity.device_id().await
    }

    /// Returns a copy of the pending operations in queue order.
    pub async fn pending(&self) -> Vec<Operation> {
        self.queue.drain().await
    }

    /// Returns the current status.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let connectivity = self.connectivity.current();
        let stats = self.driver.stats();
        let last_full_sync = self.bootstrap.last_full_sync().await?;
        let last_sync_time = stats.last_success_time.max(last_full_sync);

        Ok(SyncStatus {
            online: connectivity.state.allows_transmission(),
            queue_length: self.queue.len(),
            last_sync_time,
            device_id: self.identity.device_id().await?,
            last_full_sync,
            connectivity,
            stats,
        })
    }

    /// Deletes every configured remote collection, clears the queue and
    /// forgets the device identity and full-sync time.
    ///
    /// Local records are not touched. Subscriptions are torn down first.
    ///
    /// # Errors
    ///
    /// Remote failures abort the wipe before any local state is cleared.
    pub async fn wipe_all(&self) -> SyncResult<()> {
        self.check_running()?;
        warn!("wiping remote collections and local sync state");
        self.listener.unsubscribe(None);

        self.remote.ensure_session().await?;
        for name in self.config.collection_names() {
            self.remote.delete(name).await?;
        }

        self.queue.clear().await?;
        self.identity.reset().await?;
        self.state.remove(LAST_FULL_SYNC_KEY).await?;
        info!("sync state wiped");
        Ok(())
    }

    /// Stops background tasks and subscriptions. Later calls fail with
    /// [`SyncError::ShutDown`]. Calling it twice is harmless.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listener.unsubscribe(None);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("sync engine shut down");
    }

    /// Returns true once [`SyncEngine::shutdown`] ran.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::MemoryRemoteStore;
    use std::time::Duration;
    use tidesync_codec::{CodecError, CollectionSchema};
    use tidesync_protocol::ProtocolError;
    use tidesync_storage::{InMemoryLocalStore, InMemoryStateStore};

    async fn engine(remote: &MemoryRemoteStore) -> SyncEngine {
        SyncEngine::start(
            SyncConfig::new([CollectionSchema::new("clients")])
                .with_push_interval(Duration::from_millis(20)),
            Arc::new(InMemoryLocalStore::new()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(remote.clone()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn unknown_collection_is_rejected() {
        let engine = engine(&MemoryRemoteStore::new()).await;
        let err = engine
            .enqueue(OperationKind::Create, "employees", Record::new("e1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownCollection(_)));
    }

    #[tokio::test]
    async fn invalid_record_id_is_rejected() {
        let engine = engine(&MemoryRemoteStore::new()).await;
        let err = engine
            .enqueue(OperationKind::Create, "clients", Record::new("a/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert_eq!(engine.status().await.unwrap().queue_length, 0);
    }

    #[tokio::test]
    async fn non_finite_payload_is_rejected_and_queue_stays_loadable() {
        let remote = MemoryRemoteStore::new();
        remote.set_reachable(false);
        let state = Arc::new(InMemoryStateStore::new());
        let start = || {
            SyncEngine::start(
                SyncConfig::new([CollectionSchema::new("clients")]),
                Arc::new(InMemoryLocalStore::new()),
                state.clone(),
                Arc::new(remote.clone()),
            )
        };

        let engine = start().await.unwrap();
        engine.set_network_available(false);
        engine
            .enqueue(OperationKind::Create, "clients", Record::new("c0"))
            .await
            .unwrap();
        let err = engine
            .enqueue(
                OperationKind::Create,
                "clients",
                Record::new("c1").with("score", f64::NAN),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolError::Codec(CodecError::NonFiniteFloat { .. }))
        ));
        engine.shutdown();

        let restarted = start().await.unwrap();
        restarted.set_network_available(false);
        let pending = restarted.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id(), "c0");
    }

    #[tokio::test]
    async fn enqueue_succeeds_offline() {
        let remote = MemoryRemoteStore::new();
        remote.set_reachable(false);
        let engine = engine(&remote).await;
        engine.set_network_available(false);

        engine
            .enqueue(OperationKind::Create, "clients", Record::new("c1"))
            .await
            .unwrap();
        let status = engine.status().await.unwrap();
        assert!(!status.online);
        assert_eq!(status.queue_length, 1);
        assert_eq!(status.last_sync_time, None);
    }

    #[tokio::test]
    async fn calls_after_shutdown_fail() {
        let engine = engine(&MemoryRemoteStore::new()).await;
        engine.shutdown();
        engine.shutdown();
        assert!(engine.is_shut_down());
        assert!(matches!(
            engine.enqueue(OperationKind::Create, "clients", Record::new("c1")).await,
            Err(SyncError::ShutDown)
        ));
        assert!(matches!(engine.sync_now().await, Err(SyncError::ShutDown)));
    }

    #[tokio::test]
    async fn wipe_all_clears_remote_queue_and_identity() {
        let remote = MemoryRemoteStore::new();
        let engine = engine(&remote).await;
        let before = engine.device_id().await.unwrap();
        remote.seed("clients/c1", serde_json::json!({"id": "c1"}));
        // keep the queued operation from being sent
        engine.set_network_available(false);
        engine
            .enqueue(OperationKind::Create, "clients", Record::new("c2"))
            .await
            .unwrap();

        engine.wipe_all().await.unwrap();
        assert_eq!(remote.value_at("clients"), None);
        let status = engine.status().await.unwrap();
        assert_eq!(status.queue_length, 0);
        assert_ne!(status.device_id, before);
        assert_eq!(status.last_full_sync, None);
    }
}
