//! In-memory remote store.

use crate::error::{SyncError, SyncResult};
use crate::remote::{ChangeCallback, RemoteStore, SubscriptionHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// An in-memory [`RemoteStore`] holding one JSON tree.
///
/// Clones share the same tree, so several engines (simulating several
/// devices) can sync through one instance. Besides the trait it offers
/// knobs to simulate an unreachable store, lost sessions and failing writes.
///
/// Subscription callbacks run synchronously on the writing task, in write
/// order. They must not call back into the store.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    shared: Arc<Shared>,
}

struct Shared {
    tree: Mutex<Json>,
    subscribers: Mutex<Vec<Subscriber>>,
    // serializes mutation + notification so callbacks see changes in order
    notify: Mutex<()>,
    next_subscriber: AtomicU64,
    reachable: AtomicBool,
    session: AtomicBool,
    sessions_opened: AtomicUsize,
    failures: Mutex<HashMap<String, InjectedFailure>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            tree: Mutex::new(Json::Object(Map::new())),
            subscribers: Mutex::new(Vec::new()),
            notify: Mutex::new(()),
            next_subscriber: AtomicU64::new(1),
            reachable: AtomicBool::new(true),
            session: AtomicBool::new(false),
            sessions_opened: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

struct InjectedFailure {
    remaining: usize,
    retryable: bool,
}

struct Subscriber {
    id: u64,
    path: Vec<String>,
    callback: ChangeCallback,
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn get_at<'a>(tree: &'a Json, path: &[String]) -> Option<&'a Json> {
    path.iter()
        .try_fold(tree, |node, segment| node.as_object()?.get(segment))
}

fn set_at(tree: &mut Json, path: &[String], value: Json) {
    let Some((last, parents)) = path.split_last() else {
        *tree = value;
        return;
    };
    let mut node = tree;
    for segment in parents {
        if !node.is_object() {
            *node = Json::Object(Map::new());
        }
        node = match node {
            Json::Object(object) => object
                .entry(segment.clone())
                .or_insert_with(|| Json::Object(Map::new())),
            _ => return,
        };
    }
    if !node.is_object() {
        *node = Json::Object(Map::new());
    }
    if let Json::Object(object) = node {
        object.insert(last.clone(), value);
    }
}

/// Removes the value at `path` and prunes parents left empty.
fn remove_at(node: &mut Json, path: &[String]) {
    let Some((first, rest)) = path.split_first() else {
        *node = Json::Object(Map::new());
        return;
    };
    let Json::Object(object) = node else { return };
    if rest.is_empty() {
        object.remove(first);
        return;
    }
    if let Some(child) = object.get_mut(first) {
        remove_at(child, rest);
        if child.as_object().is_some_and(Map::is_empty) {
            object.remove(first);
        }
    }
}

fn is_empty_value(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::Object(object) => object.is_empty(),
        _ => false,
    }
}

fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

impl MemoryRemoteStore {
    /// Creates an empty, reachable store without a session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store becoming (un)reachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drops the authenticated session; the next call must re-establish it.
    pub fn drop_session(&self) {
        self.shared.session.store(false, Ordering::SeqCst);
    }

    /// Returns how many sessions have been established.
    pub fn sessions_opened(&self) -> usize {
        self.shared.sessions_opened.load(Ordering::SeqCst)
    }

    /// Makes the next `count` writes or deletes at `path` fail retryably.
    pub fn fail_next_writes(&self, path: &str, count: usize) {
        self.inject_failures(path, count, true);
    }

    /// Makes the next `count` writes or deletes at `path` fail with an error
    /// that must not be retried, like a rejected permission.
    pub fn fail_next_writes_fatal(&self, path: &str, count: usize) {
        self.inject_failures(path, count, false);
    }

    fn inject_failures(&self, path: &str, remaining: usize, retryable: bool) {
        self.shared.failures.lock().insert(
            segments(path).join("/"),
            InjectedFailure {
                remaining,
                retryable,
            },
        );
    }

    /// Returns how many writes and deletes were attempted at `path`,
    /// failed ones included.
    pub fn calls_to(&self, path: &str) -> usize {
        self.shared
            .calls
            .lock()
            .get(&segments(path).join("/"))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the value at `path`, bypassing reachability and session checks.
    pub fn value_at(&self, path: &str) -> Option<Json> {
        get_at(&self.shared.tree.lock(), &segments(path))
            .filter(|v| !is_empty_value(v))
            .cloned()
    }

    /// Writes `value` at `path` bypassing all checks, as another client would.
    ///
    /// Subscribers are notified.
    pub fn seed(&self, path: &str, value: Json) {
        self.apply(path, Some(value));
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    fn check_available(&self) -> SyncResult<()> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(SyncError::remote_retryable("remote store unreachable"));
        }
        if !self.shared.session.load(Ordering::SeqCst) {
            return Err(SyncError::remote_retryable("no authenticated session"));
        }
        Ok(())
    }

    fn check_write(&self, key: &str) -> SyncResult<()> {
        *self.shared.calls.lock().entry(key.to_owned()).or_insert(0) += 1;
        self.check_available()?;

        let mut failures = self.shared.failures.lock();
        if let Some(failure) = failures.get_mut(key) {
            if failure.remaining > 0 {
                failure.remaining -= 1;
                let message = format!("write to {key} rejected");
                return Err(if failure.retryable {
                    SyncError::remote_retryable(message)
                } else {
                    SyncError::remote_fatal(message)
                });
            }
            failures.remove(key);
        }
        Ok(())
    }

    /// Applies a change (`None` deletes) and notifies overlapping subscribers.
    fn apply(&self, path: &str, value: Option<Json>) {
        let path = segments(path);
        let _order = self.shared.notify.lock();

        let deliveries: Vec<(ChangeCallback, Option<Json>)> = {
            let mut tree = self.shared.tree.lock();
            match value.filter(|v| !is_empty_value(v)) {
                Some(value) => set_at(&mut tree, &path, value),
                None => remove_at(&mut tree, &path),
            }

            self.shared
                .subscribers
                .lock()
                .iter()
                .filter(|s| overlaps(&s.path, &path))
                .map(|s| {
                    let snapshot = get_at(&tree, &s.path)
                        .filter(|v| !is_empty_value(v))
                        .cloned();
                    (Arc::clone(&s.callback), snapshot)
                })
                .collect()
        };

        for (callback, snapshot) in deliveries {
            callback(snapshot);
        }
    }
}

fn unsubscribe(shared: &Weak<Shared>, id: u64) {
    if let Some(shared) = shared.upgrade() {
        shared.subscribers.lock().retain(|s| s.id != id);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn ensure_session(&self) -> SyncResult<()> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(SyncError::remote_retryable("remote store unreachable"));
        }
        if !self.shared.session.swap(true, Ordering::SeqCst) {
            self.shared.sessions_opened.fetch_add(1, Ordering::SeqCst);
            debug!("remote session established");
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> SyncResult<Option<Json>> {
        self.check_available()?;
        Ok(self.value_at(path))
    }

    async fn write(&self, path: &str, value: Json) -> SyncResult<()> {
        self.check_write(&segments(path).join("/"))?;
        self.apply(path, Some(value));
        Ok(())
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        self.check_write(&segments(path).join("/"))?;
        self.apply(path, None);
        Ok(())
    }

    async fn subscribe(
        &self,
        path: &str,
        on_change: ChangeCallback,
    ) -> SyncResult<SubscriptionHandle> {
        self.check_available()?;

        let id = self.shared.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let segs = segments(path);
        {
            let _order = self.shared.notify.lock();
            self.shared.subscribers.lock().push(Subscriber {
                id,
                path: segs.clone(),
                callback: Arc::clone(&on_change),
            });
            let snapshot = get_at(&self.shared.tree.lock(), &segs)
                .filter(|v| !is_empty_value(v))
                .cloned();
            on_change(snapshot);
        }

        let shared = Arc::downgrade(&self.shared);
        Ok(SubscriptionHandle::new(move || unsubscribe(&shared, id)))
    }

    async fn probe_connected(&self) -> bool {
        self.shared.reachable.load(Ordering::SeqCst)
    }
}
