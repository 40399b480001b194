//! Replication operations.

use crate::error::ProtocolResult;
use crate::path::{record_path, validate_segment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tidesync_codec::{encode, Record};
use uuid::Uuid;

/// Kind of mutation an [`Operation`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Record did not exist before.
    Create,
    /// Record replaces an existing one.
    Update,
    /// Record is removed.
    Delete,
}

impl OperationKind {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Returns true for kinds that write the payload (create and update).
    pub fn writes_payload(&self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// Identifies the record an operation targets.
///
/// At most one queued operation exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Collection name.
    pub collection: String,
    /// Record id.
    pub id: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&record_path(&self.collection, &self.id))
    }
}

/// One durable pending mutation awaiting replication.
///
/// # Fields
///
/// - `id`: unique operation id, assigned at enqueue time
/// - `kind`: create, update or delete
/// - `collection`: logical record group, e.g. `clients`
/// - `payload`: the full record; for deletes only the id matters
/// - `enqueued_at`: when the operation was queued
/// - `origin_device`: device identity at enqueue time
/// - `attempts`: failed transmission count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Unique operation id.
    pub id: Uuid,
    /// Mutation kind.
    pub kind: OperationKind,
    /// Collection name.
    pub collection: String,
    /// Record payload.
    pub payload: Record,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
    /// Device that enqueued the operation.
    pub origin_device: String,
    /// Number of failed transmissions so far.
    pub attempts: u32,
}

impl Operation {
    /// Creates an operation stamped with the current time.
    ///
    /// # Errors
    ///
    /// Fails if the collection name or the record id cannot be used as a
    /// remote path segment, or if the payload cannot be encoded (a NaN or
    /// infinite float). Such a payload could not be persisted in the queue.
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        payload: Record,
        origin_device: impl Into<String>,
    ) -> ProtocolResult<Self> {
        let collection = collection.into();
        validate_segment(&collection)?;
        validate_segment(payload.id())?;
        encode(&payload)?;
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            collection,
            payload,
            enqueued_at: Utc::now(),
            origin_device: origin_device.into(),
            attempts: 0,
        })
    }

    /// Returns the id of the target record.
    pub fn record_id(&self) -> &str {
        self.payload.id()
    }

    /// Returns the key of the target record.
    pub fn key(&self) -> RecordKey {
        RecordKey {
            collection: self.collection.clone(),
            id: self.record_id().to_owned(),
        }
    }

    /// Returns true if this operation targets the same record as `other`.
    pub fn same_record(&self, other: &Operation) -> bool {
        self.collection == other.collection && self.record_id() == other.record_id()
    }

    /// Returns the remote path of the target record.
    pub fn remote_path(&self) -> String {
        record_path(&self.collection, self.record_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use tidesync_codec::CodecError;

    #[test]
    fn kind_names() {
        assert_eq!(OperationKind::Create.as_str(), "create");
        assert_eq!("delete".parse::<OperationKind>(), Ok(OperationKind::Delete));
        assert!("upsert".parse::<OperationKind>().is_err());
        assert!(OperationKind::Update.writes_payload());
        assert!(!OperationKind::Delete.writes_payload());
    }

    #[test]
    fn new_operation_defaults() {
        let op = Operation::new(
            OperationKind::Create,
            "clients",
            Record::new("c1").with("name", "Ali"),
            "dev-a",
        )
        .unwrap();

        assert_eq!(op.attempts, 0);
        assert_eq!(op.origin_device, "dev-a");
        assert_eq!(op.record_id(), "c1");
        assert_eq!(op.remote_path(), "clients/c1");
        assert_eq!(op.key().to_string(), "clients/c1");
    }

    #[test]
    fn ids_are_unique() {
        let a = Operation::new(OperationKind::Delete, "receipts", Record::new("r9"), "d").unwrap();
        let b = Operation::new(OperationKind::Delete, "receipts", Record::new("r9"), "d").unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.same_record(&b));
    }

    #[test]
    fn rejects_unaddressable_records() {
        assert!(Operation::new(OperationKind::Create, "clients", Record::new("a/b"), "d").is_err());
        assert!(Operation::new(OperationKind::Create, "", Record::new("a"), "d").is_err());
    }

    #[test]
    fn rejects_unencodable_payloads() {
        for score in [f64::NAN, f64::INFINITY] {
            let payload = Record::new("c1").with("score", score);
            let err = Operation::new(OperationKind::Update, "clients", payload, "d").unwrap_err();
            assert!(matches!(
                err,
                ProtocolError::Codec(CodecError::NonFiniteFloat { .. })
            ));
        }
    }

    #[test]
    fn persisted_field_names() {
        let op = Operation::new(OperationKind::Update, "clients", Record::new("c1"), "d").unwrap();
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "update");
        assert!(json.get("enqueuedAt").is_some());
        assert!(json.get("originDevice").is_some());

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
