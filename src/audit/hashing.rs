/// Deterministic content hashing for domain records.
///
/// A record's field map is reduced to its hashable subset, serialized as
/// compact JSON with sorted keys, and hashed with SHA-256. The result is
/// rendered as a `0x`-prefixed lowercase hex string (66 characters), which
/// is also the `bytes32` value submitted to the audit contract.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{AnchorError, Result};

/// Identity and anchor columns that never contribute to a content hash.
pub const DEFAULT_EXCLUDED_FIELDS: &[&str] = &[
    "id",
    "last_content_hash",
    "last_chain_tx_reference",
    "blockchain_hash",
    "blockchain_tx_hash",
];

/// A 32-byte SHA-256 content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x` followed by 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Accepts the hash with or without the `0x` prefix.
impl FromStr for ContentHash {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = B256::from_str(s.trim())
            .map_err(|e| AnchorError::InvalidHash(format!("{s}: {e}")))?;
        Ok(Self(bytes.0))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert a field value to JSON, falling back to its string form when the
/// value has no JSON representation (non-finite floats, failing serializers).
pub fn field_value<T>(value: &T) -> Value
where
    T: Serialize + fmt::Display + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(Value::Null) => {
            // serde_json maps NaN and infinities to null; keep them distinct.
            let text = value.to_string();
            if text == "null" {
                Value::Null
            } else {
                Value::String(text)
            }
        }
        Ok(v) => v,
        Err(_) => Value::String(value.to_string()),
    }
}

/// Typed value of a `key=value` field given on the command line: integers,
/// floats and booleans keep their type, anything else is a string.
pub fn field_from_text(text: &str) -> Value {
    if let Ok(n) = text.parse::<i64>() {
        return field_value(&n);
    }
    if let Ok(f) = text.parse::<f64>() {
        return field_value(&f);
    }
    if let Ok(b) = text.parse::<bool>() {
        return field_value(&b);
    }
    field_value(text)
}

/// Serialize the hashable subset of `fields` as compact JSON with sorted keys.
pub fn canonical_json(fields: &Map<String, Value>, excluded: &[&str]) -> String {
    let sorted: BTreeMap<&str, Value> = fields
        .iter()
        .filter(|(k, _)| !excluded.contains(&k.as_str()))
        .map(|(k, v)| (k.as_str(), sort_nested(v)))
        .collect();

    // Serializing a map of `Value`s cannot fail.
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn sort_nested(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_nested(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_nested).collect()),
        other => other.clone(),
    }
}

/// SHA-256 of arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute the content hash of a record's field map.
pub fn compute_content_hash(fields: &Map<String, Value>, excluded: &[&str]) -> ContentHash {
    let serialized = canonical_json(fields, excluded);
    ContentHash(sha256(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let fields = map(json!({"name": "A", "age": 30}));
        assert_eq!(
            canonical_json(&fields, DEFAULT_EXCLUDED_FIELDS),
            r#"{"age":30,"name":"A"}"#
        );
    }

    #[test]
    fn test_known_hash() {
        let fields = map(json!({"name": "A", "age": 30}));
        let hash = compute_content_hash(&fields, DEFAULT_EXCLUDED_FIELDS);
        assert_eq!(
            hash.to_hex(),
            "0x4731f8b2b0b833d05c665d5dba3e2e436917ba05656a89099398146ec9cdf892"
        );
        assert_eq!(hash.to_hex().len(), 66);
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let mut a = Map::new();
        a.insert("name".into(), json!("A"));
        a.insert("age".into(), json!(30));
        let mut b = Map::new();
        b.insert("age".into(), json!(30));
        b.insert("name".into(), json!("A"));

        assert_eq!(
            compute_content_hash(&a, DEFAULT_EXCLUDED_FIELDS),
            compute_content_hash(&b, DEFAULT_EXCLUDED_FIELDS)
        );
    }

    #[test]
    fn test_excluded_fields_ignored() {
        let plain = map(json!({"name": "A", "age": 30}));
        let with_identity = map(json!({
            "id": 7,
            "name": "A",
            "age": 30,
            "last_content_hash": "0xabc",
            "blockchain_tx_hash": "0xdef"
        }));
        assert_eq!(
            compute_content_hash(&plain, DEFAULT_EXCLUDED_FIELDS),
            compute_content_hash(&with_identity, DEFAULT_EXCLUDED_FIELDS)
        );
    }

    #[test]
    fn test_single_field_change_changes_hash() {
        let a = map(json!({"name": "A", "age": 30}));
        let b = map(json!({"name": "A", "age": 31}));
        assert_ne!(
            compute_content_hash(&a, DEFAULT_EXCLUDED_FIELDS),
            compute_content_hash(&b, DEFAULT_EXCLUDED_FIELDS)
        );
    }

    #[test]
    fn test_nested_objects_sorted() {
        let a = map(json!({"meta": {"z": 1, "a": 2}}));
        assert_eq!(canonical_json(&a, &[]), r#"{"meta":{"a":2,"z":1}}"#);
    }

    #[test]
    fn test_field_from_text_keeps_types() {
        assert_eq!(field_from_text("30"), json!(30));
        assert_eq!(field_from_text("1.5"), json!(1.5));
        assert_eq!(field_from_text("true"), json!(true));
        assert_eq!(field_from_text("A"), json!("A"));
        assert_eq!(field_from_text("NaN"), json!("NaN"));
        assert_eq!(field_from_text("inf"), json!("inf"));
    }

    #[test]
    fn test_field_value_falls_back_to_string() {
        assert_eq!(field_value(&f64::NAN), Value::String("NaN".into()));
        assert_eq!(field_value(&1.5f64), json!(1.5));
        assert_eq!(field_value("text"), json!("text"));
    }

    #[test]
    fn test_content_hash_parse() {
        let hex = "0x4731f8b2b0b833d05c665d5dba3e2e436917ba05656a89099398146ec9cdf892";
        let parsed: ContentHash = hex.parse().unwrap();
        assert_eq!(parsed.to_hex(), hex);

        let bare: ContentHash = hex.trim_start_matches("0x").parse().unwrap();
        assert_eq!(parsed, bare);

        assert!("0x1234".parse::<ContentHash>().is_err());
        assert!("zz".repeat(32).parse::<ContentHash>().is_err());
    }
}
