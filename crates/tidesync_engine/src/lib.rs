//! # tidesync engine
//!
//! Offline-first synchronization between a local record store and a shared
//! remote realtime store.
//!
//! This crate provides:
//! - A durable operation queue with one pending operation per record
//! - A sync driver that drains the queue with bounded retries
//! - A connectivity monitor that verifies reachability before transmitting
//! - A change listener that filters out echoes of this device's own writes
//! - A bootstrap / full-sync orchestrator
//!
//! ## Architecture
//!
//! Mutations are enqueued and persisted first, then transmitted whenever the
//! remote store is verifiably reachable:
//!
//! ```text
//! enqueue ──▶ OperationQueue ──▶ SyncDriver ──▶ RemoteStore
//!                                   ▲                │
//!             ConnectivityMonitor ──┘                ▼
//! LocalStore ◀──────────────────── ChangeListener ◀──┘
//! ```
//!
//! ## Key Invariants
//!
//! - At most one queued operation per (collection, record id)
//! - At most one transmission pass runs at a time
//! - Transmission only happens while the remote store is verified reachable
//! - Every remote write carries `lastModified` and `syncedBy`
//! - A device never re-applies its own writes from a subscription
//! - An operation is attempted at most `max_attempts` times, then dropped
//! - Enqueue never fails because of connectivity
//!
//! Conflicts are last-writer-wins per record; there is no field-level merge.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bootstrap;
mod config;
mod connectivity;
mod driver;
mod engine;
mod error;
mod guard;
mod identity;
mod listener;
mod memory_remote;
mod queue;
mod remote;

pub use bootstrap::{Bootstrapper, FullSyncReport};
pub use config::{RetryConfig, SyncConfig, DEVICE_ID_KEY, LAST_FULL_SYNC_KEY, QUEUE_KEY};
pub use connectivity::{Connectivity, ConnectivityMonitor, ConnectivityState};
pub use driver::{PassOutcome, PassReport, SkipReason, SyncDriver, SyncStats};
pub use engine::{SyncEngine, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use identity::DeviceIdentity;
pub use listener::{ChangeListener, RecordsCallback};
pub use memory_remote::MemoryRemoteStore;
pub use queue::{EnqueueOutcome, OperationQueue};
pub use remote::{ChangeCallback, RemoteStore, SubscriptionHandle};
