//! Typed entities.

use crate::error::{ProtocolError, ProtocolResult};
use tidesync_codec::{CollectionSchema, Record};

/// A business type that replicates through one collection.
///
/// Implementors map themselves onto a [`Record`] and declare the timestamp
/// fields of their collection.
///
/// # Example
///
/// ```
/// use tidesync_codec::{CollectionSchema, Record, Value};
/// use tidesync_protocol::{Entity, ProtocolResult};
///
/// struct Employee {
///     id: String,
///     name: String,
/// }
///
/// impl Entity for Employee {
///     const COLLECTION: &'static str = "employees";
///
///     fn to_record(&self) -> Record {
///         Record::new(&self.id).with("name", self.name.as_str())
///     }
///
///     fn from_record(record: &Record) -> ProtocolResult<Self> {
///         let name = Self::text_field(record, "name")?;
///         Ok(Self { id: record.id().to_owned(), name })
///     }
/// }
///
/// let emp = Employee { id: "e1".into(), name: "Sami".into() };
/// assert_eq!(Employee::from_record(&emp.to_record()).unwrap().name, "Sami");
/// ```
pub trait Entity: Sized {
    /// Collection the entity lives in.
    const COLLECTION: &'static str;

    /// Timestamp schema of the collection.
    fn schema() -> CollectionSchema {
        CollectionSchema::new(Self::COLLECTION)
    }

    /// Converts the entity into a record.
    fn to_record(&self) -> Record;

    /// Builds the entity from a record.
    fn from_record(record: &Record) -> ProtocolResult<Self>;

    /// Reads a required text field, for use in [`Entity::from_record`].
    fn text_field(record: &Record, field: &str) -> ProtocolResult<String> {
        record
            .get(field)
            .and_then(|v| v.as_text())
            .map(str::to_owned)
            .ok_or_else(|| Self::invalid(record, format!("missing text field {field}")))
    }

    /// Builds an [`ProtocolError::InvalidRecord`] for this collection.
    fn invalid(record: &Record, message: impl Into<String>) -> ProtocolError {
        ProtocolError::InvalidRecord {
            collection: Self::COLLECTION.to_owned(),
            id: record.id().to_owned(),
            message: message.into(),
        }
    }
}
