//! Remote path layout.
//!
//! Records live at `<collection>/<id>`; a collection's snapshot is read from
//! `<collection>`.

use crate::error::{ProtocolError, ProtocolResult};

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// Characters the remote store refuses inside a key.
const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Checks that `segment` can be used as one remote path segment.
pub fn validate_segment(segment: &str) -> ProtocolResult<()> {
    if segment.is_empty() {
        return Err(ProtocolError::InvalidPathSegment {
            segment: segment.to_owned(),
            reason: "segment is empty",
        });
    }
    if segment.contains(FORBIDDEN) {
        return Err(ProtocolError::InvalidPathSegment {
            segment: segment.to_owned(),
            reason: "segment contains a reserved character",
        });
    }
    Ok(())
}

/// Returns the remote path of a record.
pub fn record_path(collection: &str, id: &str) -> String {
    format!("{collection}{PATH_SEPARATOR}{id}")
}

/// Splits a path into its non-empty segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_paths() {
        assert_eq!(record_path("clients", "c1"), "clients/c1");
        let parts: Vec<_> = segments("/clients//c1/").collect();
        assert_eq!(parts, vec!["clients", "c1"]);
    }

    #[test]
    fn segment_validation() {
        assert!(validate_segment("receipts").is_ok());
        assert!(validate_segment("a-b_c 1").is_ok());
        assert!(validate_segment("").is_err());
        assert!(validate_segment("a/b").is_err());
        assert!(validate_segment("a.b").is_err());
        assert!(validate_segment("x[0]").is_err());
    }
}
