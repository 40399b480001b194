//! Local collaborator traits.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use tidesync_codec::Record;

/// The local record store: a key-indexed persistent store per collection.
///
/// Implementations must have persisted a change durably before the call
/// returns `Ok`.
///
/// # Implementors
///
/// - [`super::InMemoryLocalStore`] - For testing
/// - [`super::FileLocalStore`] - One JSON document per collection
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns every record of a collection, ordered by id.
    async fn get_all(&self, collection: &str) -> StorageResult<Vec<Record>>;

    /// Inserts or replaces a record.
    async fn put(&self, collection: &str, record: Record) -> StorageResult<()>;

    /// Deletes a record. Deleting a missing record succeeds.
    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()>;

    /// Removes every record of a collection.
    async fn clear(&self, collection: &str) -> StorageResult<()>;
}

/// A small durable key-value store for engine state.
///
/// The engine keeps three entries here: the operation queue, the device
/// identity and the last full-sync time. Values are opaque bytes.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes a value, replacing any previous one.
    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes a value. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Checks that a key or collection name is a plain file-name component.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0']);
    if bad {
        Err(StorageError::InvalidKey(key.to_owned()))
    } else {
        Ok(())
    }
}
