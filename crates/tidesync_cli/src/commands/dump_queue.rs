//! Dump queue command implementation.

use super::open_state;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tidesync_engine::OperationQueue;
use tidesync_protocol::Operation;

/// Pending operation representation for output.
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    /// Position in the queue.
    pub position: usize,
    /// Operation id.
    pub id: String,
    /// Operation kind.
    pub kind: String,
    /// Remote path the operation targets.
    pub path: String,
    /// Failed attempts so far.
    pub attempts: u32,
    /// When the operation was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Device that enqueued it.
    pub origin_device: String,
    /// Number of payload fields besides the id.
    pub fields: usize,
}

impl QueueEntry {
    fn new(position: usize, op: &Operation) -> Self {
        Self {
            position,
            id: op.id.to_string(),
            kind: op.kind.to_string(),
            path: op.remote_path(),
            attempts: op.attempts,
            enqueued_at: op.enqueued_at,
            origin_device: op.origin_device.clone(),
            fields: op.payload.len(),
        }
    }
}

/// Runs the dump-queue command.
pub async fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = open_state(path)?;
    let pending = OperationQueue::load(state).await?.drain().await;
    let entries = entries(&pending, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries, pending.len());
        }
    }

    Ok(())
}

pub(crate) fn entries(pending: &[Operation], limit: Option<usize>) -> Vec<QueueEntry> {
    pending
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(position, op)| QueueEntry::new(position, op))
        .collect()
}

fn print_text_output(entries: &[QueueEntry], total: usize) {
    println!("Pending Operations ({} total)", total);
    println!("================");
    println!();

    for entry in entries {
        print!("[{:04}] {:6} {}", entry.position, entry.kind, entry.path);
        print!(" attempts={}", entry.attempts);
        print!(" fields={}", entry.fields);
        print!(" at={}", entry.enqueued_at.to_rfc3339());
        print!(" device={}...", &entry.origin_device[..8.min(entry.origin_device.len())]);
        println!();
    }

    if entries.len() < total {
        println!("... {} more", total - entries.len());
    }
}
