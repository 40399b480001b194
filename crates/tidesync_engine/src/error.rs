//! Error types for the sync engine.

use thiserror::Error;
use tidesync_codec::CodecError;
use tidesync_protocol::ProtocolError;
use tidesync_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Errors fall into three classes:
/// - transient ([`SyncError::is_retryable`]): retried by the next pass
/// - fatal ([`SyncError::is_fatal`]): local persistence or identity is
///   broken and synchronization cannot proceed
/// - everything else: a problem with one call's input
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote store rejected or failed a call.
    #[error("remote store error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// Local persistence failed.
    #[error("local storage error: {0}")]
    Storage(#[from] StorageError),

    /// An operation or remote record could not be built.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Persisted engine state could not be (de)serialized.
    #[error("corrupt engine state: {0}")]
    CorruptState(#[from] serde_json::Error),

    /// The device identity could not be read or generated.
    #[error("device identity unavailable: {0}")]
    Identity(String),

    /// The collection is not configured.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// A full sync is already running.
    #[error("full sync already in progress")]
    FullSyncInProgress,

    /// The engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Remote { retryable: true, .. })
    }

    /// Returns true if synchronization cannot proceed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_) | SyncError::Identity(_) | SyncError::CorruptState(_)
        )
    }
}
