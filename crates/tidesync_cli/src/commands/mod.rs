//! CLI command implementations.

pub mod dump_queue;
pub mod reset;
pub mod status;

use std::path::Path;
use std::sync::Arc;
use tidesync_storage::{FileStateStore, StateStore};

/// Opens an existing state directory.
///
/// Fails if another process (usually a running engine) holds it.
pub(crate) fn open_state(path: &Path) -> Result<Arc<dyn StateStore>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No state directory at {:?}", path).into());
    }
    Ok(Arc::new(FileStateStore::open(path)?))
}
