// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical serialization and stable SHA-256 content hashing.
//!
//! `hash(v)` serializes `v` to a byte string where object keys are sorted
//! lexicographically and arrays preserve their original order, then returns
//! the SHA-256 digest as lowercase hex. Any two nodes that canonicalize the
//! same logical value this way agree on its hash — used for pack signature
//! hashes, receipt hashes, event-bundle checksums, and envelope hashes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively sort every object's keys so the canonical form does not
/// depend on `serde_json`'s build-time `preserve_order` feature flag.
fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_value).collect()),
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map.into_iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, canonicalize_value(v));
            }
            Value::Object(out)
        }
        other => other,
    }
}

/// Produce the canonical JSON byte string for a serializable value.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `value` cannot be serialized.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    let canonical = canonicalize_value(v);
    serde_json::to_vec(&canonical)
}

/// Produce the canonical JSON string for a serializable value.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `value` cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    canonical_bytes(value).map(|b| String::from_utf8(b).expect("canonical JSON is valid UTF-8"))
}

/// Compute the hex-encoded SHA-256 hash of `value`'s canonical form.
///
/// # Examples
///
/// ```
/// use reach_hash::hash;
/// use serde_json::json;
///
/// let a = json!({"b": 1, "a": 2});
/// let b = json!({"a": 2, "b": 1});
/// assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
/// ```
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `value` cannot be serialized.
pub fn hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = canonical_bytes(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the hex-encoded SHA-256 hash of raw bytes.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"z": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "z": 1});
        assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn array_order_does_affect_hash() {
        let a = json!({"list": [1, 2, 3]});
        let b = json!({"list": [3, 2, 1]});
        assert_ne!(hash(&a).unwrap(), hash(&b).unwrap());
    }

    #[test]
    fn hash_is_64_hex_chars() {
        let h = hash(&json!({"a": 1})).unwrap();
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tampering_changes_hash() {
        let mut v = json!({"amount": 100});
        let h1 = hash(&v).unwrap();
        v["amount"] = json!(101);
        let h2 = hash(&v).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn nested_arrays_of_objects_canonicalize_keys() {
        let a = json!({"items": [{"b": 1, "a": 2}]});
        let b = json!({"items": [{"a": 2, "b": 1}]});
        assert_eq!(hash(&a).unwrap(), hash(&b).unwrap());
    }
}
