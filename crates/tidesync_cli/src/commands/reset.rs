//! Destructive state commands: identity reset and queue clearing.

use super::open_state;
use std::path::Path;
use tidesync_engine::{DeviceIdentity, OperationQueue};
use tracing::info;

/// Forgets the device identity.
///
/// The next engine start generates a fresh one, after which this device's
/// earlier remote writes no longer count as its own echoes.
pub async fn identity(path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirmed {
        return Err("Resetting the device identity cannot be undone. Use --yes to confirm.".into());
    }
    let state = open_state(path)?;
    let identity = DeviceIdentity::new(state);
    identity.reset().await?;

    info!("Device identity reset in {:?}", path);
    println!("✓ Device identity removed");
    Ok(())
}

/// Drops every pending operation.
pub async fn queue(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let state = open_state(path)?;
    let queue = OperationQueue::load(state).await?;
    let count = queue.len();

    if dry_run {
        println!("Would drop {} pending operation(s)", count);
        return Ok(());
    }

    queue.clear().await?;
    info!("Cleared {} pending operations in {:?}", count, path);
    println!("✓ Dropped {} pending operation(s)", count);
    Ok(())
}
