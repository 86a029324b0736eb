//! Hashing System - SHA-256 for Manifests and Request Fingerprints
//!
//! Digests are lowercase hex, always 64 characters.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

pub const DIGEST_HEX_LEN: usize = 64;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// True for a well-formed digest as produced by [`sha256_hex`].
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let sorted = sort_value(&v);
    to_string(&sorted)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 of a value's canonical JSON.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Request fingerprint: identical template and context on the same engine
/// give the same hash, so rendered output can be cached against it.
/// job_hash = sha256(template_hash + ":" + context_hash + ":" + engine_version)
pub fn compute_job_hash(
    template: &impl Serialize,
    context: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let combined = format!(
        "{}:{}:{}",
        content_hash(template)?,
        content_hash(context)?,
        engine_version
    );
    Ok(sha256_hex(combined.as_bytes()))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": {"y": 1, "b": [3, 1]}});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":{"b":[3,1],"y":1},"z":1}"#);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(is_digest_hex(&sha256_hex(b"")));
        assert!(!is_digest_hex("ABC"));
    }

    #[test]
    fn test_job_hash_tracks_inputs() {
        let template = json!({"id": "coffee"});
        let h1 = compute_job_hash(&template, &json!({"stampsEarned": 3}), "1.0.0").unwrap();
        let h2 = compute_job_hash(&template, &json!({"stampsEarned": 3}), "1.0.0").unwrap();
        let h3 = compute_job_hash(&template, &json!({"stampsEarned": 4}), "1.0.0").unwrap();
        let h4 = compute_job_hash(&template, &json!({"stampsEarned": 3}), "1.1.0").unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_ne!(h1, h4);
    }
}
