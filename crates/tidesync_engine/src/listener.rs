//! Remote change listener.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::identity::DeviceIdentity;
use crate::queue::OperationQueue;
use crate::remote::{RemoteStore, SubscriptionHandle};
use parking_lot::Mutex;
use serde_json::{Map, Value as Json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tidesync_codec::{CollectionSchema, Record};
use tidesync_protocol::RemoteRecord;
use tidesync_storage::LocalStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Receives the non-echo records of a collection after every remote change.
pub type RecordsCallback = Arc<dyn Fn(Vec<Record>) + Send + Sync>;

struct Subscription {
    handle: SubscriptionHandle,
    pump: JoinHandle<()>,
}

impl Subscription {
    fn close(self) {
        self.handle.cancel();
        self.pump.abort();
    }
}

/// Keeps live subscriptions on remote collections.
///
/// Every remote change delivers the full collection snapshot. The listener
/// decodes it, discards echoes of this device's own writes and passes the
/// rest to the collection callback. With `apply_remote_changes` on it also
/// mirrors the snapshot into the local store, leaving alone records that
/// still have a pending local operation.
pub struct ChangeListener {
    remote: Arc<dyn RemoteStore>,
    local: Arc<dyn LocalStore>,
    queue: Arc<OperationQueue>,
    identity: Arc<DeviceIdentity>,
    connectivity: Arc<ConnectivityMonitor>,
    config: Arc<SyncConfig>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl ChangeListener {
    /// Creates a listener with no subscriptions.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalStore>,
        queue: Arc<OperationQueue>,
        identity: Arc<DeviceIdentity>,
        connectivity: Arc<ConnectivityMonitor>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            remote,
            local,
            queue,
            identity,
            connectivity,
            config,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to a collection, replacing any existing subscription on it.
    ///
    /// The callback first receives the current snapshot, then one batch per
    /// remote change. Batches are delivered in order on a background task.
    pub async fn subscribe(&self, collection: &str, callback: RecordsCallback) -> SyncResult<()> {
        let schema = self
            .config
            .schema(collection)
            .cloned()
            .ok_or_else(|| SyncError::UnknownCollection(collection.to_owned()))?;

        self.unsubscribe(Some(collection));

        let device_id = self.identity.device_id().await?;
        self.remote.ensure_session().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .remote
            .subscribe(
                collection,
                Arc::new(move |snapshot: Option<Json>| {
                    // receiver gone means the subscription is closing
                    let _ = tx.send(snapshot);
                }),
            )
            .await?;
        self.connectivity.record_reachable();

        let pump = Pump {
            collection: collection.to_owned(),
            schema,
            device_id,
            local: Arc::clone(&self.local),
            queue: Arc::clone(&self.queue),
            apply: self.config.apply_remote_changes,
            callback,
            known: HashSet::new(),
        };
        let pump = tokio::spawn(pump.run(rx));

        let replaced = self
            .subscriptions
            .lock()
            .insert(collection.to_owned(), Subscription { handle, pump });
        if let Some(old) = replaced {
            old.close();
        }

        debug!(collection, "subscribed to remote collection");
        Ok(())
    }

    /// Tears down the subscription on `collection`, or every subscription
    /// when `None`. Returns how many were closed.
    pub fn unsubscribe(&self, collection: Option<&str>) -> usize {
        let closing: Vec<Subscription> = {
            let mut subscriptions = self.subscriptions.lock();
            match collection {
                Some(name) => subscriptions.remove(name).into_iter().collect(),
                None => subscriptions.drain().map(|(_, s)| s).collect(),
            }
        };
        let count = closing.len();
        for subscription in closing {
            subscription.close();
        }
        if count > 0 {
            debug!(count, collection = collection.unwrap_or("*"), "unsubscribed");
        }
        count
    }

    /// Returns the collections with a live subscription, sorted.
    pub fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.unsubscribe(None);
    }
}

struct Pump {
    collection: String,
    schema: CollectionSchema,
    device_id: String,
    local: Arc<dyn LocalStore>,
    queue: Arc<OperationQueue>,
    apply: bool,
    callback: RecordsCallback,
    // ids present in the previous snapshot
    known: HashSet<String>,
}

impl Pump {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Option<Json>>) {
        while let Some(snapshot) = rx.recv().await {
            self.handle(snapshot).await;
        }
    }

    async fn handle(&mut self, snapshot: Option<Json>) {
        let entries = match snapshot {
            Some(Json::Object(entries)) => entries,
            None => Map::new(),
            Some(other) => {
                warn!(collection = %self.collection, value = %other, "ignoring non-object collection snapshot");
                return;
            }
        };

        let mut present = HashSet::with_capacity(entries.len());
        let mut incoming = Vec::new();
        let mut echoes = 0usize;
        for (key, wire) in &entries {
            present.insert(key.clone());
            match RemoteRecord::from_wire_with_warnings(wire, &self.schema) {
                Ok((remote, warnings)) => {
                    for warning in warnings {
                        warn!(collection = %self.collection, record_id = %key, %warning, "remote record decoded with warnings");
                    }
                    if remote.is_echo_of(&self.device_id) {
                        echoes += 1;
                    } else {
                        incoming.push(remote.record);
                    }
                }
                Err(e) => {
                    warn!(collection = %self.collection, record_id = %key, error = %e, "skipping undecodable remote record");
                }
            }
        }
        debug!(
            collection = %self.collection,
            records = incoming.len(),
            echoes,
            "remote change received"
        );

        if self.apply {
            self.apply_locally(&incoming, &present).await;
        }
        self.known = present;
        (self.callback)(incoming);
    }

    async fn apply_locally(&self, incoming: &[Record], present: &HashSet<String>) {
        let pending = self.queue.pending_ids(&self.collection).await;

        for record in incoming {
            if pending.contains(record.id()) {
                debug!(collection = %self.collection, record_id = record.id(), "local change pending, remote update not applied");
                continue;
            }
            if let Err(e) = self.local.put(&self.collection, record.clone()).await {
                error!(collection = %self.collection, record_id = record.id(), error = %e, "failed to apply remote record");
            }
        }

        for gone in self.known.difference(present) {
            if pending.contains(gone) {
                continue;
            }
            if let Err(e) = self.local.delete(&self.collection, gone).await {
                error!(collection = %self.collection, record_id = %gone, error = %e, "failed to apply remote deletion");
            }
        }
    }
}
