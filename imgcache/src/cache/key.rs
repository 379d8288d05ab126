//! Deterministic cache key generation.
//!
//! A key fingerprints three things:
//!
//! - the source identifier (image URL or content hash),
//! - the processing parameters, serialized canonically so that construction
//!   order never changes the result,
//! - the current UTC hour, so keys roll over on their own even when nobody
//!   runs expiry sweeps.
//!
//! The inputs are hashed with SHA-256 and the hex digest is truncated to
//! [`KEY_HEX_LEN`] characters.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::cache::types::CacheKey;

/// Number of hex characters kept from the SHA-256 digest (128 bits).
pub const KEY_HEX_LEN: usize = 32;

/// Generate a cache key for `source_id` processed with `params`, bucketed
/// to the current hour.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use imgcache::cache::generate_key;
/// use serde_json::json;
///
/// let mut params = HashMap::new();
/// params.insert("scale".to_string(), json!(4));
/// params.insert("denoise".to_string(), json!(true));
///
/// let key = generate_key("https://example.com/cat.png", &params);
/// assert_eq!(key.as_str().len(), 32);
/// ```
pub fn generate_key<'a, I, K>(source_id: &str, params: I) -> CacheKey
where
    I: IntoIterator<Item = (K, &'a Value)>,
    K: AsRef<str>,
{
    generate_key_at(source_id, params, Utc::now())
}

/// Generate a cache key using the time bucket containing `at`.
pub fn generate_key_at<'a, I, K>(source_id: &str, params: I, at: DateTime<Utc>) -> CacheKey
where
    I: IntoIterator<Item = (K, &'a Value)>,
    K: AsRef<str>,
{
    let mut canonical = String::new();
    write_canonical_params(params, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    hasher.update([0u8]);
    hasher.update(time_bucket(at).as_bytes());

    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(KEY_HEX_LEN);
    CacheKey::from_digest(digest)
}

/// Hour bucket used as the soft-TTL component of a key (`YYYYMMDDHH`).
pub fn time_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H").to_string()
}

fn write_canonical_params<'a, I, K>(params: I, out: &mut String)
where
    I: IntoIterator<Item = (K, &'a Value)>,
    K: AsRef<str>,
{
    let mut entries: Vec<(K, &Value)> = params.into_iter().collect();
    entries.sort_by(|a, b| a.0.as_ref().cmp(b.0.as_ref()));

    out.push('{');
    for (i, (name, value)) in entries.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(name.as_ref(), out);
        out.push(':');
        write_canonical_value(value, out);
    }
    out.push('}');
}

// Object keys are sorted at every depth, independent of serde_json's map
// ordering feature.
fn write_canonical_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_params(map.iter(), out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_json_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}
