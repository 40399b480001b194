//! Configuration for the sync engine.

use std::time::Duration;
use tidesync_codec::CollectionSchema;
use tidesync_protocol::Entity;

/// State-store key of the persisted operation queue.
pub const QUEUE_KEY: &str = "sync_queue";
/// State-store key of the device identity.
pub const DEVICE_ID_KEY: &str = "device_id";
/// State-store key of the last successful full-sync time.
pub const LAST_FULL_SYNC_KEY: &str = "last_full_sync";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Known collections and their timestamp schemas.
    pub collections: Vec<CollectionSchema>,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Period of the transmission ticker.
    pub push_interval: Duration,
    /// Period of the reachability probe.
    pub probe_interval: Duration,
    /// Whether incoming remote changes are written into the local store.
    pub apply_remote_changes: bool,
}

impl SyncConfig {
    /// Creates a configuration for the given collections.
    pub fn new(collections: impl IntoIterator<Item = CollectionSchema>) -> Self {
        Self {
            collections: collections.into_iter().collect(),
            retry: RetryConfig::default(),
            push_interval: Duration::from_secs(5),
            probe_interval: Duration::from_secs(30),
            apply_remote_changes: true,
        }
    }

    /// Adds a collection.
    pub fn with_collection(mut self, schema: CollectionSchema) -> Self {
        self.collections.push(schema);
        self
    }

    /// Adds the collection of a typed entity with the schema it declares.
    ///
    /// Replaces a schema already configured under the same name.
    pub fn with_entity<E: Entity>(mut self) -> Self {
        let schema = E::schema();
        match self.collections.iter_mut().find(|s| s.name() == schema.name()) {
            Some(existing) => *existing = schema,
            None => self.collections.push(schema),
        }
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the transmission ticker period.
    pub fn with_push_interval(mut self, interval: Duration) -> Self {
        self.push_interval = interval;
        self
    }

    /// Sets the reachability probe period.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Enables or disables applying remote changes to the local store.
    pub fn with_apply_remote_changes(mut self, apply: bool) -> Self {
        self.apply_remote_changes = apply;
        self
    }

    /// Looks up the schema of a collection.
    pub fn schema(&self, collection: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|s| s.name() == collection)
    }

    /// Iterates the configured collection names.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(CollectionSchema::name)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Configuration for retry behavior.
///
/// Failed operations are retried by later passes at the push interval;
/// there is no additional back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Failed transmissions after which an operation is dropped.
    pub max_attempts: u32,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Creates a configuration that drops an operation on its first failure.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    /// Returns true once `attempts` failures exhaust the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
