//! # tidesync Codec
//!
//! Record value model and wire codec for tidesync.
//!
//! The remote store speaks plain JSON: it has no date type and cannot
//! represent a missing value. This crate converts between that wire form
//! and the richer local [`Record`]:
//!
//! - [`encode`] deep-copies a record, turns every [`Value::Absent`] into an
//!   explicit `null` and every [`Value::Timestamp`] into an RFC 3339 string
//! - [`decode`] restores timestamps in the fields a [`CollectionSchema`]
//!   recognizes, including fields nested inside log arrays
//!
//! ## Round-trip law
//!
//! For every record `r`, `decode(&encode(&r)?, schema)` equals `r` as long
//! as all timestamps sit in recognized fields and no field is
//! [`Value::Absent`] (absence comes back as [`Value::Null`]).
//!
//! ## Usage
//!
//! ```
//! use tidesync_codec::{decode, encode, CollectionSchema, Record};
//!
//! let schema = CollectionSchema::new("clients");
//! let record = Record::new("c1").with("name", "Ali");
//!
//! let wire = encode(&record).unwrap();
//! assert_eq!(wire["name"], "Ali");
//! assert_eq!(decode(&wire, &schema).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod schema;
mod value;

pub use decoder::{decode, decode_value, decode_with_warnings, parse_timestamp, Decoded};
pub use encoder::{encode, encode_value, format_timestamp};
pub use error::{CodecError, CodecResult, DecodeWarning};
pub use schema::{CollectionSchema, DEFAULT_TIMESTAMP_FIELDS};
pub use value::{Record, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn schema() -> CollectionSchema {
        CollectionSchema::new("receipts")
            .with_timestamp_field("issuedAt")
            .with_log_array("paymentLog", ["at"])
    }

    fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_102_444_800, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            Utc.timestamp_opt(secs, nanos)
                .single()
                .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
        })
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (i64::MAX as u64 + 1..=u64::MAX).prop_map(Value::Unsigned),
            (proptest::num::f64::NORMAL
                | proptest::num::f64::SUBNORMAL
                | proptest::num::f64::ZERO)
                .prop_map(Value::Float),
            "[a-z0-9 :.-]{0,12}".prop_map(Value::Text),
        ]
    }

    /// Any value without timestamps or absent markers, nested up to 3 deep.
    fn arb_plain() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    fn arb_log_entry() -> impl Strategy<Value = Value> {
        (
            arb_timestamp(),
            proptest::collection::btree_map("[a-z]{2,6}", arb_plain(), 0..3),
        )
            .prop_map(|(at, extra)| {
                let mut entry: std::collections::BTreeMap<String, Value> = extra
                    .into_iter()
                    .filter(|(name, _)| name != "at")
                    .collect();
                entry.insert("at".to_owned(), Value::from(at));
                Value::Map(entry)
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            id in "[a-z0-9]{1,8}",
            issued in arb_timestamp(),
            created in arb_timestamp(),
            plain in proptest::collection::btree_map("[a-z]{1,6}", arb_plain(), 0..6),
            log in proptest::collection::vec(arb_log_entry(), 0..4),
        ) {
            let mut record = Record::new(id)
                .with("issuedAt", issued)
                .with("createdAt", created);
            for (name, value) in plain {
                if !schema().is_timestamp_field(&name) && name != "paymentLog" {
                    record.insert(name, value);
                }
            }
            record.insert("paymentLog", log);

            let wire = encode(&record).unwrap();
            let back = decode(&wire, &schema()).unwrap();
            prop_assert_eq!(encode(&back).unwrap(), wire);
            prop_assert_eq!(back, record);
        }
    }
}
