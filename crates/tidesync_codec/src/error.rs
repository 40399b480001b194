//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Wire value does not have the shape of a record.
    #[error("invalid record structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// Record has no usable `id` field.
    #[error("record is missing a textual id")]
    MissingId,

    /// Float that JSON cannot carry (NaN or infinite).
    #[error("non-finite float in field {field}")]
    NonFiniteFloat {
        /// Field holding the float.
        field: String,
    },
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}

/// A non-fatal problem found while decoding a wire record.
///
/// The offending field is passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    /// Dotted path of the field, e.g. `paymentLog[2].at`.
    pub field: String,
    /// The raw text that failed to parse.
    pub raw: String,
    /// Parser message.
    pub reason: String,
}

impl std::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timestamp field {} could not be parsed ({:?}): {}",
            self.field, self.raw, self.reason
        )
    }
}
