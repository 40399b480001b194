//! Remote record envelope.

use crate::error::ProtocolResult;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use tidesync_codec::{decode_with_warnings, encode, format_timestamp, parse_timestamp};
use tidesync_codec::{CollectionSchema, DecodeWarning, Record, Value};

/// Wire field holding the time of the last write.
pub const LAST_MODIFIED_FIELD: &str = "lastModified";

/// Wire field holding the identity of the device that wrote the record.
pub const SYNCED_BY_FIELD: &str = "syncedBy";

/// A record as stored remotely, split into domain data and engine metadata.
///
/// `lastModified` and `syncedBy` are added by the engine on every write and
/// never belong to the domain record itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// The domain record, without engine fields.
    pub record: Record,
    /// When the record was last written.
    pub last_modified: Option<DateTime<Utc>>,
    /// Device identity of the last writer.
    pub synced_by: Option<String>,
}

impl RemoteRecord {
    /// Encodes `record` and stamps it with `lastModified` and `syncedBy`.
    pub fn stamp(record: &Record, device_id: &str, now: DateTime<Utc>) -> ProtocolResult<Json> {
        let mut wire = encode(record)?;
        if let Json::Object(object) = &mut wire {
            object.insert(
                LAST_MODIFIED_FIELD.to_owned(),
                Json::String(format_timestamp(&now)),
            );
            object.insert(SYNCED_BY_FIELD.to_owned(), Json::String(device_id.to_owned()));
        }
        Ok(wire)
    }

    /// Decodes a wire record and lifts the engine fields out of it.
    pub fn from_wire(wire: &Json, schema: &CollectionSchema) -> ProtocolResult<Self> {
        Ok(Self::from_wire_with_warnings(wire, schema)?.0)
    }

    /// Like [`RemoteRecord::from_wire`], also returning decode warnings.
    pub fn from_wire_with_warnings(
        wire: &Json,
        schema: &CollectionSchema,
    ) -> ProtocolResult<(Self, Vec<DecodeWarning>)> {
        let decoded = decode_with_warnings(wire, schema)?;
        let mut record = decoded.record;

        let last_modified = match record.remove(LAST_MODIFIED_FIELD) {
            Some(Value::Timestamp(ts)) => Some(ts),
            Some(Value::Text(raw)) => parse_timestamp(&raw).ok(),
            _ => None,
        };
        let synced_by = match record.remove(SYNCED_BY_FIELD) {
            Some(Value::Text(device)) => Some(device),
            _ => None,
        };

        Ok((
            Self {
                record,
                last_modified,
                synced_by,
            },
            decoded.warnings,
        ))
    }

    /// Returns true if the record was written by `device_id`.
    pub fn is_echo_of(&self, device_id: &str) -> bool {
        self.synced_by.as_deref() == Some(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_adds_engine_fields() {
        let now = parse_timestamp("2024-06-01T12:00:00Z").unwrap();
        let wire = RemoteRecord::stamp(&Record::new("c1").with("name", "Ali"), "dev-a", now).unwrap();

        assert_eq!(wire["id"], "c1");
        assert_eq!(wire["name"], "Ali");
        assert_eq!(wire[LAST_MODIFIED_FIELD], "2024-06-01T12:00:00Z");
        assert_eq!(wire[SYNCED_BY_FIELD], "dev-a");
    }

    #[test]
    fn from_wire_strips_engine_fields() {
        let now = parse_timestamp("2024-06-01T12:00:00Z").unwrap();
        let record = Record::new("c1").with("name", "Ali");
        let wire = RemoteRecord::stamp(&record, "dev-a", now).unwrap();

        let remote = RemoteRecord::from_wire(&wire, &CollectionSchema::new("clients")).unwrap();
        assert_eq!(remote.record, record);
        assert_eq!(remote.last_modified, Some(now));
        assert_eq!(remote.synced_by.as_deref(), Some("dev-a"));
        assert!(remote.is_echo_of("dev-a"));
        assert!(!remote.is_echo_of("dev-b"));
    }

    #[test]
    fn unstamped_records_are_never_echoes() {
        let wire = serde_json::json!({ "id": "legacy", "name": "old" });
        let remote = RemoteRecord::from_wire(&wire, &CollectionSchema::new("clients")).unwrap();
        assert_eq!(remote.synced_by, None);
        assert!(!remote.is_echo_of("dev-a"));
    }
}
