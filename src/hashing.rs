//! Content hashing for the audit trail.
//!
//! Trades are bound to the evidence and decision that justified them by the
//! SHA-256 of a canonical JSON form: keys sorted at every nesting level,
//! compact separators. Two structurally equal payloads hash identically no
//! matter how their maps were built.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hash a JSON payload in canonical form, returning a lowercase hex digest.
pub fn canonical_json_hash(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild every object with sorted keys. Arrays keep their order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
