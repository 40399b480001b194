//! Wire to record decoding.

use crate::error::{CodecError, CodecResult, DecodeWarning};
use crate::schema::CollectionSchema;
use crate::value::{Record, Value};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use tracing::warn;

/// A decoded record together with the warnings produced while decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The decoded record.
    pub record: Record,
    /// Timestamp fields that failed to parse and were left as text.
    pub warnings: Vec<DecodeWarning>,
}

/// Parses a wire timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Decodes a wire record, logging any decode warnings.
///
/// See [`decode_with_warnings`].
pub fn decode(wire: &Json, schema: &CollectionSchema) -> CodecResult<Record> {
    let decoded = decode_with_warnings(wire, schema)?;
    for warning in &decoded.warnings {
        warn!(
            collection = schema.name(),
            record_id = decoded.record.id(),
            "{warning}"
        );
    }
    Ok(decoded.record)
}

/// Decodes a wire record and returns the warnings instead of logging them.
///
/// Text in recognized timestamp fields is parsed back into
/// [`Value::Timestamp`]; text that does not parse stays [`Value::Text`] and
/// produces a [`DecodeWarning`]. All other fields are converted structurally.
///
/// # Errors
///
/// Fails if `wire` is not an object or carries no `id`.
pub fn decode_with_warnings(wire: &Json, schema: &CollectionSchema) -> CodecResult<Decoded> {
    let object = wire
        .as_object()
        .ok_or_else(|| CodecError::invalid_structure("expected an object for a record"))?;

    let id = match object.get(Record::ID_FIELD) {
        Some(Json::String(s)) => s.clone(),
        Some(Json::Number(n)) => n.to_string(),
        _ => return Err(CodecError::MissingId),
    };

    let mut warnings = Vec::new();
    let mut fields = BTreeMap::new();

    for (name, raw) in object {
        if name == Record::ID_FIELD {
            continue;
        }
        let mut value = decode_value(raw);
        if schema.is_timestamp_field(name) {
            restore_timestamp(name, &mut value, &mut warnings);
        } else if let Some(log_fields) = schema.log_fields(name) {
            if let Value::Array(entries) = &mut value {
                for (i, entry) in entries.iter_mut().enumerate() {
                    let Value::Map(entry) = entry else { continue };
                    for field in log_fields {
                        if let Some(item) = entry.get_mut(field) {
                            restore_timestamp(&format!("{name}[{i}].{field}"), item, &mut warnings);
                        }
                    }
                }
            }
        }
        fields.insert(name.clone(), value);
    }

    Ok(Decoded {
        record: Record::from_parts(id, fields),
        warnings,
    })
}

/// Converts a wire value without any timestamp interpretation.
pub fn decode_value(raw: &Json) -> Value {
    match raw {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(u) = n.as_u64() {
                Value::Unsigned(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(decode_value).collect()),
        Json::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect(),
        ),
    }
}

fn restore_timestamp(path: &str, value: &mut Value, warnings: &mut Vec<DecodeWarning>) {
    let Value::Text(raw) = value else { return };
    match parse_timestamp(raw) {
        Ok(ts) => *value = Value::Timestamp(ts),
        Err(e) => warnings.push(DecodeWarning {
            field: path.to_owned(),
            raw: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use serde_json::json;

    fn receipts() -> CollectionSchema {
        CollectionSchema::new("receipts")
            .with_timestamp_field("issuedAt")
            .with_log_array("paymentLog", ["at"])
    }

    #[test]
    fn recognized_fields_become_timestamps() {
        let wire = json!({
            "id": "r1",
            "issuedAt": "2024-05-02T08:30:00Z",
            "label": "2024-05-02T08:30:00Z",
            "paymentLog": [{ "at": "2024-05-03T09:00:00.250Z", "amount": 40 }],
        });

        let record = decode(&wire, &receipts()).unwrap();
        assert_eq!(record.id(), "r1");
        assert_eq!(
            record.get("issuedAt").and_then(Value::as_timestamp),
            Some(parse_timestamp("2024-05-02T08:30:00Z").unwrap())
        );
        // same text outside the schema stays text
        assert_eq!(
            record.get("label"),
            Some(&Value::Text("2024-05-02T08:30:00Z".into()))
        );
        let entry = record.get("paymentLog").unwrap().as_array().unwrap()[0]
            .as_map()
            .unwrap();
        assert!(entry["at"].as_timestamp().is_some());
        assert_eq!(entry["amount"], Value::Integer(40));
    }

    #[test]
    fn unparseable_timestamp_passes_through_with_warning() {
        let wire = json!({
            "id": "r2",
            "issuedAt": "yesterday",
            "paymentLog": [{ "at": "not a date" }],
        });

        let decoded = decode_with_warnings(&wire, &receipts()).unwrap();
        assert_eq!(
            decoded.record.get("issuedAt"),
            Some(&Value::Text("yesterday".into()))
        );
        assert_eq!(decoded.warnings.len(), 2);
        assert_eq!(decoded.warnings[0].field, "issuedAt");
        assert_eq!(decoded.warnings[1].field, "paymentLog[0].at");
    }

    #[test]
    fn null_timestamp_stays_null() {
        let wire = json!({ "id": "r3", "issuedAt": null });
        let decoded = decode_with_warnings(&wire, &receipts()).unwrap();
        assert_eq!(decoded.record.get("issuedAt"), Some(&Value::Null));
        assert!(decoded.warnings.is_empty());
    }

    #[test]
    fn structural_errors() {
        let schema = receipts();
        assert!(matches!(
            decode(&json!([1, 2]), &schema),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert_eq!(
            decode(&json!({ "name": "x" }), &schema),
            Err(CodecError::MissingId)
        );
        assert_eq!(decode(&json!({ "id": 7 }), &schema).unwrap().id(), "7");
    }

    #[test]
    fn large_unsigned_integers_survive_reencoding() {
        let wire = json!({ "id": "r5", "counter": u64::MAX, "small": 12 });
        let record = decode(&wire, &receipts()).unwrap();
        assert_eq!(record.get("counter"), Some(&Value::Unsigned(u64::MAX)));
        assert_eq!(record.get("small"), Some(&Value::Integer(12)));
        assert_eq!(encode(&record).unwrap(), wire);
    }

    #[test]
    fn round_trip_keeps_timestamps_and_plain_fields() {
        let issued = parse_timestamp("2023-12-31T23:59:59.123456789Z").unwrap();
        let record = Record::new("r4")
            .with("issuedAt", issued)
            .with("total", 19.99)
            .with("count", 3i64)
            .with("paid", true)
            .with(
                "paymentLog",
                vec![Value::map([
                    ("at", Value::from(issued)),
                    ("by", Value::from("cash")),
                ])],
            );

        let back = decode(&encode(&record).unwrap(), &receipts()).unwrap();
        assert_eq!(back, record);
    }
}
