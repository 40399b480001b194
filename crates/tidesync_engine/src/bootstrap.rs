//! Bootstrap / full-sync orchestrator.

use crate::config::{SyncConfig, LAST_FULL_SYNC_KEY};
use crate::connectivity::ConnectivityMonitor;
use crate::driver::{PassOutcome, SyncDriver};
use crate::error::{SyncError, SyncResult};
use crate::guard::BusyFlag;
use crate::identity::DeviceIdentity;
use crate::queue::OperationQueue;
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::sync::Arc;
use tidesync_codec::{format_timestamp, parse_timestamp, CollectionSchema, Record};
use tidesync_protocol::{Operation, OperationKind, RemoteRecord};
use tidesync_storage::{LocalStore, StateStore};
use tracing::{debug, info, warn};

/// Result of a full sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullSyncReport {
    /// Records pulled from remote snapshots into the local store.
    pub pulled: usize,
    /// Collections whose local contents were replaced.
    pub collections_replaced: usize,
    /// Create operations enqueued for local records.
    pub enqueued: usize,
    /// Outcome of the closing transmission pass.
    pub pass: PassOutcome,
}

/// Establishes consistency between local and remote stores.
///
/// A full sync runs in three steps:
///
/// 1. Pull every configured collection. A non-empty remote snapshot is
///    authoritative and replaces the local collection.
/// 2. Enqueue a create for every local record. Creates of records that
///    exist remotely are downgraded by the driver, so this is idempotent.
/// 3. Drain the queue.
///
/// Records with a pending local operation are left alone in both steps:
/// their queued intent is newer than any snapshot.
pub struct Bootstrapper {
    config: Arc<SyncConfig>,
    local: Arc<dyn LocalStore>,
    state: Arc<dyn StateStore>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<OperationQueue>,
    identity: Arc<DeviceIdentity>,
    connectivity: Arc<ConnectivityMonitor>,
    driver: Arc<SyncDriver>,
    running: BusyFlag,
}

impl Bootstrapper {
    /// Creates an orchestrator.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SyncConfig>,
        local: Arc<dyn LocalStore>,
        state: Arc<dyn StateStore>,
        remote: Arc<dyn RemoteStore>,
        queue: Arc<OperationQueue>,
        identity: Arc<DeviceIdentity>,
        connectivity: Arc<ConnectivityMonitor>,
        driver: Arc<SyncDriver>,
    ) -> Self {
        Self {
            config,
            local,
            state,
            remote,
            queue,
            identity,
            connectivity,
            driver,
            running: BusyFlag::new(),
        }
    }

    /// Returns true while a full sync runs.
    pub fn is_running(&self) -> bool {
        self.running.is_held()
    }

    /// Runs a full sync.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::FullSyncInProgress`] if one is already running,
    /// remote errors if a snapshot cannot be read, and fatal errors if the
    /// local stores fail. Nothing is enqueued when pulling fails.
    pub async fn full_sync(&self) -> SyncResult<FullSyncReport> {
        let Some(_running) = self.running.try_acquire() else {
            return Err(SyncError::FullSyncInProgress);
        };
        info!("full sync started");

        let device_id = self.identity.device_id().await?;
        self.remote.ensure_session().await?;

        let mut pulled = 0;
        let mut collections_replaced = 0;
        for schema in &self.config.collections {
            let snapshot = self.remote.read(schema.name()).await?;
            self.connectivity.record_reachable();

            let records = decode_snapshot(schema, snapshot);
            if records.is_empty() {
                debug!(collection = schema.name(), "remote collection empty, keeping local");
                continue;
            }
            pulled += self.replace_local(schema.name(), records).await?;
            collections_replaced += 1;
        }

        let mut operations = Vec::new();
        for name in self.config.collection_names() {
            let pending = self.queue.pending_ids(name).await;
            for record in self.local.get_all(name).await? {
                if pending.contains(record.id()) {
                    continue;
                }
                operations.push(Operation::new(
                    OperationKind::Create,
                    name,
                    record,
                    device_id.as_str(),
                )?);
            }
        }
        let enqueued = operations.len();
        self.queue.enqueue_all(operations).await?;

        let finished = format_timestamp(&Utc::now());
        self.state
            .set(LAST_FULL_SYNC_KEY, finished.as_bytes())
            .await?;

        let pass = self.driver.run_pass().await?;
        info!(pulled, collections_replaced, enqueued, "full sync finished");

        Ok(FullSyncReport {
            pulled,
            collections_replaced,
            enqueued,
            pass,
        })
    }

    /// Replaces a local collection with `records`, keeping records that have
    /// a pending operation. Returns how many remote records were stored.
    async fn replace_local(&self, collection: &str, records: Vec<Record>) -> SyncResult<usize> {
        let pending = self.queue.pending_ids(collection).await;
        let kept: Vec<Record> = self
            .local
            .get_all(collection)
            .await?
            .into_iter()
            .filter(|r| pending.contains(r.id()))
            .collect();

        self.local.clear(collection).await?;
        let mut stored = 0;
        for record in records {
            if pending.contains(record.id()) {
                continue;
            }
            self.local.put(collection, record).await?;
            stored += 1;
        }
        for record in kept {
            self.local.put(collection, record).await?;
        }
        debug!(collection, stored, "local collection replaced from remote");
        Ok(stored)
    }

    /// Returns when the last full sync finished, if one ever did.
    pub async fn last_full_sync(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let Some(bytes) = self.state.get(LAST_FULL_SYNC_KEY).await? else {
            return Ok(None);
        };
        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|raw| parse_timestamp(raw).ok());
        if parsed.is_none() {
            warn!("ignoring unreadable last full sync time");
        }
        Ok(parsed)
    }
}

fn decode_snapshot(schema: &CollectionSchema, snapshot: Option<Json>) -> Vec<Record> {
    let Some(Json::Object(entries)) = snapshot else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|(key, wire)| match RemoteRecord::from_wire_with_warnings(wire, schema) {
            Ok((remote, warnings)) => {
                for warning in warnings {
                    warn!(collection = schema.name(), record_id = %key, %warning, "remote record decoded with warnings");
                }
                Some(remote.record)
            }
            Err(e) => {
                warn!(collection = schema.name(), record_id = %key, error = %e, "skipping undecodable remote record");
                None
            }
        })
        .collect()
}
