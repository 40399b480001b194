//! Record to wire encoding.

use crate::error::{CodecError, CodecResult};
use crate::value::{Record, Value};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value as Json};

/// Formats a timestamp the way it is stored on the wire.
///
/// RFC 3339 in UTC with a `Z` suffix. Sub-second digits are kept exactly
/// so decoding yields the same instant.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Encodes a record into its wire representation.
///
/// The input is not modified. Every [`Value::Absent`] at any depth becomes
/// an explicit `null`, and every [`Value::Timestamp`] becomes an RFC 3339
/// string. The record id is written as the `id` field.
///
/// # Errors
///
/// Fails if the record contains a NaN or infinite float.
pub fn encode(record: &Record) -> CodecResult<Json> {
    let mut object = Map::new();
    object.insert(Record::ID_FIELD.to_owned(), Json::String(record.id().to_owned()));
    for (name, value) in record.fields() {
        object.insert(name.to_owned(), encode_value(name, value)?);
    }
    Ok(Json::Object(object))
}

/// Encodes a single value. `path` names the value in error messages.
pub fn encode_value(path: &str, value: &Value) -> CodecResult<Json> {
    Ok(match value {
        Value::Absent | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(n) => Json::Number(Number::from(*n)),
        Value::Unsigned(n) => Json::Number(Number::from(*n)),
        Value::Float(f) => Json::Number(Number::from_f64(*f).ok_or_else(|| {
            CodecError::NonFiniteFloat {
                field: path.to_owned(),
            }
        })?),
        Value::Text(s) => Json::String(s.clone()),
        Value::Timestamp(ts) => Json::String(format_timestamp(ts)),
        Value::Array(items) => Json::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| encode_value(&format!("{path}[{i}]"), item))
                .collect::<CodecResult<_>>()?,
        ),
        Value::Map(fields) => {
            let mut object = Map::new();
            for (name, item) in fields {
                object.insert(name.clone(), encode_value(&format!("{path}.{name}"), item)?);
            }
            Json::Object(object)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn absent_becomes_null_at_every_depth() {
        let record = Record::new("c1")
            .with("phone", Value::Absent)
            .with(
                "address",
                Value::map([("street", Value::Absent), ("city", Value::from("Tunis"))]),
            )
            .with("tags", vec![Value::Absent, Value::from("vip")]);

        let wire = encode(&record).unwrap();
        assert_eq!(
            wire,
            json!({
                "id": "c1",
                "phone": null,
                "address": { "street": null, "city": "Tunis" },
                "tags": [null, "vip"],
            })
        );
    }

    #[test]
    fn timestamps_become_iso_strings() {
        let record = Record::new("r1")
            .with("issuedAt", ts("2024-05-02T08:30:00Z"))
            .with(
                "paymentLog",
                vec![Value::map([
                    ("at", Value::from(ts("2024-05-03T09:00:00.250Z"))),
                    ("amount", Value::from(40i64)),
                ])],
            );

        let wire = encode(&record).unwrap();
        assert_eq!(wire["issuedAt"], json!("2024-05-02T08:30:00Z"));
        assert_eq!(wire["paymentLog"][0]["at"], json!("2024-05-03T09:00:00.250Z"));
        assert_eq!(wire["paymentLog"][0]["amount"], json!(40));
    }

    #[test]
    fn input_is_left_untouched() {
        let record = Record::new("c1").with("note", Value::Absent);
        let before = record.clone();
        encode(&record).unwrap();
        assert_eq!(record, before);
    }

    #[test]
    fn non_finite_float_is_rejected() {
        let record = Record::new("c1").with("score", f64::NAN);
        let err = encode(&record).unwrap_err();
        assert_eq!(
            err,
            CodecError::NonFiniteFloat {
                field: "score".into()
            }
        );
    }
}
