//! Canonical JSON and idempotency-key synthesis (§4.2, §6).

use serde_json::Value;
use sha1::{Digest, Sha1};

/// Recursively sorts object keys so two semantically-equal JSON values
/// serialize identically regardless of field insertion order.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Canonical JSON text: sorted keys, no extraneous whitespace.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).expect("canonical JSON serialization cannot fail")
}

/// Synthesizes an idempotency key when the caller doesn't supply one:
/// `sha1(canonical_json(payload))[:12]` plus event type and run id (§4.2).
pub fn synthesize_idempotency_key(run_id: &str, event_type: &str, payload: &Value) -> String {
    let canon = canonical_json(payload);
    let mut hasher = Sha1::new();
    hasher.update(canon.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let short = &digest[..12];
    format!("{run_id}:{event_type}:{short}")
}
