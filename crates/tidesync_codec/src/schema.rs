//! Per-collection timestamp schemas.

use std::collections::{BTreeMap, BTreeSet};

/// Field names every schema treats as timestamps.
pub const DEFAULT_TIMESTAMP_FIELDS: &[&str] = &["createdAt", "updatedAt"];

/// Describes which fields of a collection's records carry timestamps.
///
/// The wire form has no date type, so the decoder needs to know which text
/// fields to turn back into [`chrono::DateTime`] values. Two kinds of
/// locations are recognized:
///
/// - top-level fields, e.g. `issuedAt`
/// - fields of the objects inside a nested log array, e.g. the `at` field of
///   every element of `paymentLog`
///
/// Fields outside the schema pass through the decoder unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    name: String,
    timestamp_fields: BTreeSet<String>,
    log_arrays: BTreeMap<String, BTreeSet<String>>,
}

impl CollectionSchema {
    /// Creates a schema recognizing [`DEFAULT_TIMESTAMP_FIELDS`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamp_fields: DEFAULT_TIMESTAMP_FIELDS
                .iter()
                .map(|f| (*f).to_owned())
                .collect(),
            log_arrays: BTreeMap::new(),
        }
    }

    /// Adds a recognized top-level timestamp field.
    #[must_use]
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_fields.insert(field.into());
        self
    }

    /// Adds a nested log array whose elements carry the given timestamp fields.
    #[must_use]
    pub fn with_log_array<I, S>(mut self, array: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_arrays
            .entry(array.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if `field` is a recognized top-level timestamp field.
    pub fn is_timestamp_field(&self, field: &str) -> bool {
        self.timestamp_fields.contains(field)
    }

    /// Returns the timestamp fields of a log array's elements, if `array`
    /// is a recognized log array.
    pub fn log_fields(&self, array: &str) -> Option<&BTreeSet<String>> {
        self.log_arrays.get(array)
    }
}
