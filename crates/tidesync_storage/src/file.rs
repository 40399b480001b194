//! File-based backends for persistent storage.

use crate::backend::{validate_key, LocalStore, StateStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tidesync_codec::Record;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Name of the advisory lock file inside a state directory.
const LOCK_FILE: &str = "LOCK";

/// Writes `data` to `path` atomically: temp file, fsync, rename.
async fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A local record store keeping one JSON document per collection.
///
/// ```text
/// <dir>/
/// ├─ clients.json
/// └─ receipts.json
/// ```
///
/// Every mutation rewrites the collection document atomically, so a crash
/// leaves either the old or the new version on disk.
#[derive(Debug)]
pub struct FileLocalStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLocalStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, collection: &str) -> StorageResult<PathBuf> {
        validate_key(collection)?;
        Ok(self.dir.join(format!("{collection}.json")))
    }

    async fn load(&self, collection: &str) -> StorageResult<BTreeMap<String, Record>> {
        let path = self.collection_path(collection)?;
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(BTreeMap::new());
        };
        let records: Vec<Record> = serde_json::from_slice(&bytes)?;
        Ok(records
            .into_iter()
            .map(|r| (r.id().to_owned(), r))
            .collect())
    }

    async fn save(&self, collection: &str, records: &BTreeMap<String, Record>) -> StorageResult<()> {
        let path = self.collection_path(collection)?;
        let list: Vec<&Record> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;
        write_atomic(&path, &bytes).await
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn get_all(&self, collection: &str) -> StorageResult<Vec<Record>> {
        Ok(self.load(collection).await?.into_values().collect())
    }

    async fn put(&self, collection: &str, record: Record) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load(collection).await?;
        records.insert(record.id().to_owned(), record);
        self.save(collection, &records).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load(collection).await?;
        if records.remove(id).is_some() {
            self.save(collection, &records).await?;
        }
        Ok(())
    }

    async fn clear(&self, collection: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.collection_path(collection)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// An engine state store keeping one file per key.
///
/// ```text
/// <dir>/
/// ├─ LOCK              # Advisory lock, one engine per directory
/// ├─ device_id
/// ├─ last_full_sync
/// └─ sync_queue
/// ```
///
/// The directory is locked exclusively for the lifetime of the store.
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    _lock_file: File,
}

impl FileStateStore {
    /// Opens or creates a state directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the
    /// directory, or an I/O error.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(dir)?;
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the state directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        if key == LOCK_FILE {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        read_optional(&self.key_path(key)?).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        write_atomic(&self.key_path(key)?, value).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.key_path(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_store_persists_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = FileLocalStore::open(dir.path()).unwrap();
            store
                .put("clients", Record::new("c1").with("name", "Ali"))
                .await
                .unwrap();
            store.put("clients", Record::new("c2")).await.unwrap();
            store.delete("clients", "c2").await.unwrap();
        }

        let store = FileLocalStore::open(dir.path()).unwrap();
        let all = store.get_all("clients").await.unwrap();
        assert_eq!(all, vec![Record::new("c1").with("name", "Ali")]);
        assert!(dir.path().join("clients.json").exists());
    }

    #[tokio::test]
    async fn local_store_clear_removes_document() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();
        store.put("receipts", Record::new("r1")).await.unwrap();

        store.clear("receipts").await.unwrap();
        store.clear("receipts").await.unwrap();
        assert!(store.get_all("receipts").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_store_rejects_path_like_collections() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();
        let err = store.get_all("../etc").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn state_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();

        assert_eq!(store.get("device_id").await.unwrap(), None);
        store.set("device_id", b"abc").await.unwrap();
        assert_eq!(store.get("device_id").await.unwrap(), Some(b"abc".to_vec()));

        store.remove("device_id").await.unwrap();
        store.remove("device_id").await.unwrap();
        assert_eq!(store.get("device_id").await.unwrap(), None);
        assert!(store.set(LOCK_FILE, b"x").await.is_err());
    }

    #[test]
    fn state_store_is_exclusive() {
        let dir = tempdir().unwrap();
        let _first = FileStateStore::open(dir.path()).unwrap();
        let second = FileStateStore::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked)));
    }
}
