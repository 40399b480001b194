//! In-memory backends for testing.

use crate::backend::{LocalStore, StateStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tidesync_codec::Record;

/// An in-memory local record store.
///
/// Suitable for unit tests, integration tests and ephemeral clients.
/// It can be switched into an unavailable mode to exercise fatal
/// persistence failures.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use tidesync_codec::Record;
/// use tidesync_storage::{InMemoryLocalStore, LocalStore};
///
/// let store = InMemoryLocalStore::new();
/// store.put("clients", Record::new("c1")).await.unwrap();
/// assert_eq!(store.get_all("clients").await.unwrap().len(), 1);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Record>>>,
    unavailable: AtomicBool,
}

impl InMemoryLocalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of records in a collection.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get_all(&self, collection: &str) -> StorageResult<Vec<Record>> {
        self.check()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, collection: &str, record: Record) -> StorageResult<()> {
        self.check()?;
        self.collections
            .write()
            .entry(collection.to_owned())
            .or_default()
            .insert(record.id().to_owned(), record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()> {
        self.check()?;
        if let Some(records) = self.collections.write().get_mut(collection) {
            records.remove(id);
        }
        Ok(())
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        self.check()?;
        self.collections.write().remove(collection);
        Ok(())
    }
}

/// An in-memory engine state store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns true if `key` holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check()?;
        self.entries.write().insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_put_replaces_by_id() {
        let store = InMemoryLocalStore::new();
        store
            .put("clients", Record::new("c1").with("name", "Ali"))
            .await
            .unwrap();
        store
            .put("clients", Record::new("c1").with("name", "Alia"))
            .await
            .unwrap();

        let all = store.get_all("clients").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("name").and_then(|v| v.as_text()), Some("Alia"));
    }

    #[tokio::test]
    async fn local_get_all_is_ordered_and_scoped() {
        let store = InMemoryLocalStore::new();
        store.put("clients", Record::new("b")).await.unwrap();
        store.put("clients", Record::new("a")).await.unwrap();
        store.put("receipts", Record::new("r1")).await.unwrap();

        let ids: Vec<_> = store
            .get_all("clients")
            .await
            .unwrap()
            .iter()
            .map(|r| r.id().to_owned())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.get_all("employees").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_delete_and_clear() {
        let store = InMemoryLocalStore::new();
        store.put("clients", Record::new("a")).await.unwrap();
        store.put("clients", Record::new("b")).await.unwrap();

        store.delete("clients", "a").await.unwrap();
        store.delete("clients", "missing").await.unwrap();
        assert_eq!(store.count("clients"), 1);

        store.clear("clients").await.unwrap();
        assert_eq!(store.count("clients"), 0);
    }

    #[tokio::test]
    async fn unavailable_store_fails() {
        let store = InMemoryStateStore::new();
        store.set_unavailable(true);
        let err = store.set("device_id", b"x").await.unwrap_err();
        assert!(err.is_unavailable());

        store.set_unavailable(false);
        store.set("device_id", b"x").await.unwrap();
        assert_eq!(store.get("device_id").await.unwrap(), Some(b"x".to_vec()));
        store.remove("device_id").await.unwrap();
        assert!(!store.contains("device_id"));
    }
}
