//! Durable operation queue.

use crate::config::QUEUE_KEY;
use crate::error::SyncResult;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tidesync_protocol::Operation;
use tidesync_storage::StateStore;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// What [`OperationQueue::enqueue`] did with a new operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No operation for the record was pending; the new one went to the back.
    Appended,
    /// A pending operation for the same record was replaced in its slot.
    Replaced {
        /// Id of the operation that was replaced.
        previous: Uuid,
    },
}

/// A durable, ordered list of pending operations.
///
/// The queue is persisted to the [`StateStore`] under [`QUEUE_KEY`] after
/// every mutation, so it survives restarts.
///
/// # Invariants
///
/// - At most one operation per (collection, record id). A later enqueue for
///   the same record replaces the earlier one in place, keeping its
///   position.
/// - The in-memory list changes only once the new list has been persisted.
pub struct OperationQueue {
    state: Arc<dyn StateStore>,
    entries: Mutex<Vec<Operation>>,
    len: AtomicUsize,
}

impl OperationQueue {
    /// Loads the persisted queue, or starts empty.
    ///
    /// # Errors
    ///
    /// Fails if the state store is unavailable or the stored queue is
    /// corrupt.
    pub async fn load(state: Arc<dyn StateStore>) -> SyncResult<Self> {
        let entries: Vec<Operation> = match state.get(QUEUE_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Vec::new(),
        };
        debug!(pending = entries.len(), "loaded operation queue");
        Ok(Self {
            state,
            len: AtomicUsize::new(entries.len()),
            entries: Mutex::new(entries),
        })
    }

    /// Adds an operation, replacing any pending operation for the same record.
    pub async fn enqueue(&self, operation: Operation) -> SyncResult<EnqueueOutcome> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();

        let outcome = match next.iter().position(|op| op.same_record(&operation)) {
            Some(slot) => {
                let previous = std::mem::replace(&mut next[slot], operation);
                EnqueueOutcome::Replaced {
                    previous: previous.id,
                }
            }
            None => {
                next.push(operation);
                EnqueueOutcome::Appended
            }
        };

        self.commit(&mut entries, next).await?;
        Ok(outcome)
    }

    /// Enqueues a batch with a single persistence write.
    ///
    /// Each operation follows the same replace-in-place rule as
    /// [`OperationQueue::enqueue`]. Returns how many were appended.
    pub async fn enqueue_all(&self, operations: Vec<Operation>) -> SyncResult<usize> {
        if operations.is_empty() {
            return Ok(0);
        }
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        let mut appended = 0;
        for operation in operations {
            match next.iter().position(|op| op.same_record(&operation)) {
                Some(slot) => next[slot] = operation,
                None => {
                    next.push(operation);
                    appended += 1;
                }
            }
        }
        self.commit(&mut entries, next).await?;
        Ok(appended)
    }

    /// Returns a copy of the queue in order.
    ///
    /// The lock is released before the caller starts network I/O.
    pub async fn drain(&self) -> Vec<Operation> {
        self.entries.lock().await.clone()
    }

    /// Removes operations by id. Unknown ids are ignored.
    pub async fn remove(&self, ids: &[Uuid]) -> SyncResult<usize> {
        self.settle(ids, &[]).await
    }

    /// Increments the attempt counter of operations by id.
    pub async fn record_failures(&self, ids: &[Uuid]) -> SyncResult<()> {
        self.settle(&[], ids).await.map(|_| ())
    }

    /// Applies the result of a transmission pass with a single write:
    /// removes `done` and increments the attempts of `failed`.
    ///
    /// Ids that are no longer queued (for example because a newer operation
    /// replaced them mid-pass) are ignored. Returns how many were removed.
    pub async fn settle(&self, done: &[Uuid], failed: &[Uuid]) -> SyncResult<usize> {
        let mut entries = self.entries.lock().await;
        let done: HashSet<&Uuid> = done.iter().collect();
        let failed: HashSet<&Uuid> = failed.iter().collect();

        let mut next = Vec::with_capacity(entries.len());
        let mut removed = 0;
        for op in entries.iter() {
            if done.contains(&op.id) {
                removed += 1;
                continue;
            }
            let mut op = op.clone();
            if failed.contains(&op.id) {
                op.attempts += 1;
            }
            next.push(op);
        }

        if removed == 0 && failed.is_empty() {
            return Ok(0);
        }
        self.commit(&mut entries, next).await?;
        Ok(removed)
    }

    /// Returns the ids of records with a pending operation in `collection`.
    pub async fn pending_ids(&self, collection: &str) -> HashSet<String> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|op| op.collection == collection)
            .map(|op| op.record_id().to_owned())
            .collect()
    }

    /// Drops every pending operation.
    pub async fn clear(&self) -> SyncResult<()> {
        let mut entries = self.entries.lock().await;
        self.commit(&mut entries, Vec::new()).await
    }

    /// Returns the number of pending operations without waiting for the lock.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn commit(&self, entries: &mut Vec<Operation>, next: Vec<Operation>) -> SyncResult<()> {
        let bytes = serde_json::to_vec(&next)?;
        self.state.set(QUEUE_KEY, &bytes).await?;
        self.len.store(next.len(), Ordering::SeqCst);
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidesync_codec::Record;
    use tidesync_protocol::OperationKind;
    use tidesync_storage::InMemoryStateStore;

    fn op(kind: OperationKind, collection: &str, id: &str, name: &str) -> Operation {
        Operation::new(kind, collection, Record::new(id).with("name", name), "dev").unwrap()
    }

    async fn queue() -> (Arc<InMemoryStateStore>, OperationQueue) {
        let state = Arc::new(InMemoryStateStore::new());
        let queue = OperationQueue::load(state.clone()).await.unwrap();
        (state, queue)
    }

    #[tokio::test]
    async fn enqueue_appends_in_order() {
        let (_, queue) = queue().await;
        queue.enqueue(op(OperationKind::Create, "clients", "a", "A")).await.unwrap();
        queue.enqueue(op(OperationKind::Create, "clients", "b", "B")).await.unwrap();
        queue.enqueue(op(OperationKind::Create, "receipts", "a", "R")).await.unwrap();

        let ids: Vec<_> = queue.drain().await.iter().map(|o| o.key().to_string()).collect();
        assert_eq!(ids, vec!["clients/a", "clients/b", "receipts/a"]);
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn same_record_replaces_in_place() {
        let (_, queue) = queue().await;
        let first = op(OperationKind::Create, "clients", "c1", "Ali");
        let first_id = first.id;
        queue.enqueue(first).await.unwrap();
        queue.enqueue(op(OperationKind::Create, "clients", "c2", "Sara")).await.unwrap();

        let outcome = queue
            .enqueue(op(OperationKind::Update, "clients", "c1", "Alia"))
            .await
            .unwrap();
        assert_eq!(outcome, EnqueueOutcome::Replaced { previous: first_id });

        let pending = queue.drain().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].record_id(), "c1");
        assert_eq!(pending[0].kind, OperationKind::Update);
        assert_eq!(
            pending[0].payload.get("name").and_then(|v| v.as_text()),
            Some("Alia")
        );
        assert_eq!(pending[1].record_id(), "c2");
    }

    #[tokio::test]
    async fn queue_survives_reload() {
        let (state, queue) = queue().await;
        queue.enqueue(op(OperationKind::Create, "clients", "c1", "Ali")).await.unwrap();
        queue.enqueue(op(OperationKind::Delete, "receipts", "r9", "")).await.unwrap();
        let before = queue.drain().await;
        drop(queue);

        let reloaded = OperationQueue::load(state).await.unwrap();
        assert_eq!(reloaded.drain().await, before);
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn settle_removes_and_counts_failures() {
        let (_, queue) = queue().await;
        let a = op(OperationKind::Create, "clients", "a", "A");
        let b = op(OperationKind::Create, "clients", "b", "B");
        let (a_id, b_id) = (a.id, b.id);
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let removed = queue.settle(&[a_id], &[b_id]).await.unwrap();
        assert_eq!(removed, 1);

        let pending = queue.drain().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b_id);
        assert_eq!(pending[0].attempts, 1);

        queue.record_failures(&[b_id]).await.unwrap();
        assert_eq!(queue.drain().await[0].attempts, 2);
        assert_eq!(queue.remove(&[b_id]).await.unwrap(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn settle_ignores_replaced_operations() {
        let (_, queue) = queue().await;
        let old = op(OperationKind::Create, "clients", "c1", "old");
        let old_id = old.id;
        queue.enqueue(old).await.unwrap();
        // a newer intent for the same record arrives mid-pass
        queue.enqueue(op(OperationKind::Update, "clients", "c1", "new")).await.unwrap();

        assert_eq!(queue.settle(&[old_id], &[]).await.unwrap(), 0);
        let pending = queue.drain().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);
    }

    #[tokio::test]
    async fn enqueue_all_collapses_duplicates() {
        let (state, queue) = queue().await;
        queue.enqueue(op(OperationKind::Update, "clients", "a", "old")).await.unwrap();

        let appended = queue
            .enqueue_all(vec![
                op(OperationKind::Create, "clients", "a", "new"),
                op(OperationKind::Create, "clients", "b", "B"),
                op(OperationKind::Create, "clients", "b", "B2"),
            ])
            .await
            .unwrap();
        assert_eq!(appended, 1);

        let reloaded = OperationQueue::load(state).await.unwrap();
        let pending = reloaded.drain().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload.get("name").and_then(|v| v.as_text()), Some("new"));
        assert_eq!(pending[1].payload.get("name").and_then(|v| v.as_text()), Some("B2"));
    }

    #[tokio::test]
    async fn pending_lookups() {
        let (_, queue) = queue().await;
        queue.enqueue(op(OperationKind::Create, "clients", "c1", "x")).await.unwrap();
        queue.enqueue(op(OperationKind::Create, "receipts", "r1", "y")).await.unwrap();

        assert!(queue.pending_ids("clients").await.contains("c1"));
        assert_eq!(
            queue.pending_ids("receipts").await,
            HashSet::from(["r1".to_owned()])
        );

        queue.clear().await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failed_persistence_leaves_queue_untouched() {
        let (state, queue) = queue().await;
        queue.enqueue(op(OperationKind::Create, "clients", "a", "A")).await.unwrap();

        state.set_unavailable(true);
        let err = queue
            .enqueue(op(OperationKind::Create, "clients", "b", "B"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain().await.len(), 1);
    }
}
