//! Status command implementation.

use super::open_state;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tidesync_codec::parse_timestamp;
use tidesync_engine::{OperationQueue, DEVICE_ID_KEY, LAST_FULL_SYNC_KEY};
use tidesync_storage::StateStore;

/// Persisted sync state summary.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// State directory path.
    pub path: String,
    /// Device identity, if one was generated.
    pub device_id: Option<String>,
    /// Number of pending operations.
    pub queue_length: usize,
    /// Pending operations per collection.
    pub pending_by_collection: BTreeMap<String, usize>,
    /// Pending operations that already failed at least once.
    pub retrying: usize,
    /// Enqueue time of the oldest pending operation.
    pub oldest_enqueued: Option<DateTime<Utc>>,
    /// When the last full sync finished.
    pub last_full_sync: Option<DateTime<Utc>>,
}

/// Runs the status command.
pub async fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let state = open_state(path)?;
    let report = collect(path, state).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

pub(crate) async fn collect(
    path: &Path,
    state: Arc<dyn StateStore>,
) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let device_id = state
        .get(DEVICE_ID_KEY)
        .await?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    let last_full_sync = state
        .get(LAST_FULL_SYNC_KEY)
        .await?
        .and_then(|bytes| parse_timestamp(&String::from_utf8_lossy(&bytes)).ok());

    let pending = OperationQueue::load(state).await?.drain().await;
    let mut pending_by_collection = BTreeMap::new();
    for op in &pending {
        *pending_by_collection.entry(op.collection.clone()).or_insert(0) += 1;
    }

    Ok(StatusReport {
        path: path.display().to_string(),
        device_id,
        queue_length: pending.len(),
        pending_by_collection,
        retrying: pending.iter().filter(|op| op.attempts > 0).count(),
        oldest_enqueued: pending.iter().map(|op| op.enqueued_at).min(),
        last_full_sync,
    })
}

fn print_text_output(report: &StatusReport) {
    println!("Sync State: {}", report.path);
    println!("================");
    println!();
    println!(
        "Device ID:       {}",
        report.device_id.as_deref().unwrap_or("(not generated)")
    );
    match report.last_full_sync {
        Some(ts) => println!("Last full sync:  {}", ts.to_rfc3339()),
        None => println!("Last full sync:  never"),
    }
    println!("Pending:         {}", report.queue_length);
    if report.retrying > 0 {
        println!("  retrying:      {}", report.retrying);
    }
    if let Some(oldest) = report.oldest_enqueued {
        println!("  oldest:        {}", oldest.to_rfc3339());
    }
    for (collection, count) in &report.pending_by_collection {
        println!("  {:14} {}", format!("{collection}:"), count);
    }
}
