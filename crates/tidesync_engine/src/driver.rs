//! Sync driver: drains the operation queue into the remote store.

use crate::config::RetryConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::guard::BusyFlag;
use crate::identity::DeviceIdentity;
use crate::queue::OperationQueue;
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tidesync_protocol::{Operation, OperationKind, RemoteRecord};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Cumulative statistics about transmission passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Passes that attempted at least one operation.
    pub passes: u64,
    /// Operations written to or deleted from the remote store.
    pub operations_sent: u64,
    /// Failed attempts, including the ones that led to a drop.
    pub operations_failed: u64,
    /// Operations abandoned after reaching the retry ceiling.
    pub operations_dropped: u64,
    /// Creates written as updates because the record already existed.
    pub downgraded_creates: u64,
    /// When the last pass finished.
    pub last_pass_time: Option<DateTime<Utc>>,
    /// When an operation last reached the remote store.
    pub last_success_time: Option<DateTime<Utc>>,
    /// Last transmission error.
    pub last_error: Option<String>,
}

/// Result of one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Operations that reached the remote store.
    pub sent: usize,
    /// Operations that failed and stay queued.
    pub failed: usize,
    /// Operations abandoned in this pass.
    pub dropped: Vec<Uuid>,
    /// Creates downgraded to updates.
    pub downgraded: usize,
    /// Operations left unattempted because connectivity was lost mid-pass.
    pub deferred: usize,
}

/// Why a pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass is running.
    InFlight,
    /// Connectivity does not permit transmission.
    Offline,
    /// Nothing is queued.
    Empty,
}

/// Outcome of [`SyncDriver::run_pass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass ran.
    Completed(PassReport),
    /// The pass did not start.
    Skipped(SkipReason),
}

impl PassOutcome {
    /// Returns the report if the pass ran.
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            PassOutcome::Completed(report) => Some(report),
            PassOutcome::Skipped(_) => None,
        }
    }
}

enum Attempt {
    Sent { downgraded: bool },
    Failed { retryable: bool, message: String },
}

/// Reconciles the operation queue with the remote store.
///
/// At most one pass runs at a time. A trigger that arrives while a pass is
/// running is dropped; the periodic ticker picks up whatever it missed.
pub struct SyncDriver {
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<DeviceIdentity>,
    connectivity: Arc<ConnectivityMonitor>,
    retry: RetryConfig,
    push_interval: Duration,
    in_flight: BusyFlag,
    stats: RwLock<SyncStats>,
}

impl SyncDriver {
    /// Creates a driver.
    pub fn new(
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<DeviceIdentity>,
        connectivity: Arc<ConnectivityMonitor>,
        retry: RetryConfig,
        push_interval: Duration,
    ) -> Self {
        Self {
            queue,
            remote,
            identity,
            connectivity,
            retry,
            push_interval,
            in_flight: BusyFlag::new(),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns a copy of the cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a pass is running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_held()
    }

    /// Runs one drain-and-transmit pass.
    ///
    /// Remote failures never escape: they become retry or drop decisions.
    ///
    /// # Errors
    ///
    /// Only fatal errors are returned: the device identity or the queue
    /// could not be read or persisted.
    pub async fn run_pass(&self) -> SyncResult<PassOutcome> {
        let Some(_pass) = self.in_flight.try_acquire() else {
            debug!("pass already in flight, trigger dropped");
            return Ok(PassOutcome::Skipped(SkipReason::InFlight));
        };
        if !self.connectivity.is_online() {
            return Ok(PassOutcome::Skipped(SkipReason::Offline));
        }
        let pending = self.queue.drain().await;
        if pending.is_empty() {
            return Ok(PassOutcome::Skipped(SkipReason::Empty));
        }
        let device_id = self.identity.device_id().await?;

        let mut report = PassReport::default();
        let mut done = Vec::new();
        let mut failed = Vec::new();
        let mut last_error = None;

        for (index, op) in pending.iter().enumerate() {
            if !self.connectivity.is_online() {
                report.deferred = pending.len() - index;
                info!(deferred = report.deferred, "connectivity lost, pausing pass");
                break;
            }

            match self.transmit(op, &device_id).await {
                Attempt::Sent { downgraded } => {
                    report.sent += 1;
                    report.downgraded += usize::from(downgraded);
                    done.push(op.id);
                }
                Attempt::Failed { retryable, message } => {
                    let attempts = op.attempts + 1;
                    if !retryable || self.retry.is_exhausted(attempts) {
                        warn!(
                            op_id = %op.id,
                            collection = %op.collection,
                            record_id = op.record_id(),
                            kind = %op.kind,
                            attempts,
                            error = %message,
                            "dropping operation, it will not be replicated"
                        );
                        report.dropped.push(op.id);
                        done.push(op.id);
                    } else {
                        debug!(
                            op_id = %op.id,
                            record_id = op.record_id(),
                            attempts,
                            error = %message,
                            "operation failed, will retry"
                        );
                        report.failed += 1;
                        failed.push(op.id);
                    }
                    last_error = Some(message);
                }
            }
        }

        self.queue.settle(&done, &failed).await?;

        let now = Utc::now();
        {
            let mut stats = self.stats.write();
            stats.passes += 1;
            stats.operations_sent += report.sent as u64;
            stats.operations_failed += (report.failed + report.dropped.len()) as u64;
            stats.operations_dropped += report.dropped.len() as u64;
            stats.downgraded_creates += report.downgraded as u64;
            stats.last_pass_time = Some(now);
            if report.sent > 0 {
                stats.last_success_time = Some(now);
            }
            if last_error.is_some() {
                stats.last_error = last_error;
            }
        }

        debug!(
            sent = report.sent,
            failed = report.failed,
            dropped = report.dropped.len(),
            remaining = self.queue.len(),
            "pass complete"
        );
        Ok(PassOutcome::Completed(report))
    }

    async fn transmit(&self, op: &Operation, device_id: &str) -> Attempt {
        match self.try_transmit(op, device_id).await {
            Ok(downgraded) => Attempt::Sent { downgraded },
            Err(e) => Attempt::Failed {
                retryable: e.is_retryable(),
                message: e.to_string(),
            },
        }
    }

    async fn try_transmit(&self, op: &Operation, device_id: &str) -> SyncResult<bool> {
        self.remote.ensure_session().await?;
        let path = op.remote_path();

        if !op.kind.writes_payload() {
            self.remote.delete(&path).await?;
            return Ok(false);
        }

        let downgraded =
            op.kind == OperationKind::Create && self.remote.read(&path).await?.is_some();
        if downgraded {
            debug!(op_id = %op.id, path = %path, "record exists remotely, writing create as update");
        }

        let wire = RemoteRecord::stamp(&op.payload, device_id, Utc::now())?;
        self.remote.write(&path, wire).await?;
        Ok(downgraded)
    }

    /// Starts a pass in the background.
    pub fn trigger(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            driver.run_logged().await;
        });
    }

    async fn run_logged(&self) {
        if let Err(e) = self.run_pass().await {
            error!(error = %e, "sync pass failed");
        }
    }

    /// Spawns the periodic ticker: a pass every push interval while online
    /// with work queued.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(driver.push_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if driver.connectivity.is_online() && !driver.queue.is_empty() {
                    driver.run_logged().await;
                }
            }
        })
    }

    /// Spawns a task that runs a pass on every transition to online.
    pub fn spawn_reconnect_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let driver = Arc::clone(self);
        let mut changes = self.connectivity.subscribe();
        let mut was_online = changes.borrow_and_update().state.allows_transmission();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let online = changes.borrow_and_update().state.allows_transmission();
                if online && !was_online {
                    debug!("connectivity restored, draining queue");
                    driver.run_logged().await;
                }
                was_online = online;
            }
        })
    }
}
