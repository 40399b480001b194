//! Error types for protocol values.

use thiserror::Error;
use tidesync_codec::CodecError;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or reading protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A collection name or record id cannot be used as a remote path segment.
    #[error("invalid path segment {segment:?}: {reason}")]
    InvalidPathSegment {
        /// The rejected segment.
        segment: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A record could not be mapped onto a typed entity.
    #[error("invalid {collection} record {id}: {message}")]
    InvalidRecord {
        /// Collection of the record.
        collection: String,
        /// Record id.
        id: String,
        /// What was wrong.
        message: String,
    },

    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
