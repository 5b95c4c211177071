//! Step-cache key derivation.
//!
//! A step's key is `sha256(step_name ":" content_fingerprint ":"
//! canonical_config_json)`. The config subset MUST contain every option
//! whose change alters the step's output and nothing else; the subsets
//! themselves live next to each step, this module only provides the
//! digest machinery and the fingerprint functions.

use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Cache namespace for ASR-derived entries.
pub const NS_ASR: &str = "asr";
/// Cache namespace for LLM-derived entries.
pub const NS_LLM: &str = "llm";

/// TTL for entries derived from downloaded media (ASR output).
pub const TTL_DOWNLOAD_DERIVED: Duration = Duration::from_secs(48 * 3600);
/// TTL for LLM-derived entries.
pub const TTL_LLM_DERIVED: Duration = Duration::from_secs(24 * 3600);

/// CRC32 of raw audio bytes, as 8 hex digits. Cheap enough to run on
/// multi-hundred-megabyte inputs where a cryptographic hash is overkill.
#[must_use]
pub fn audio_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    format!("{:08x}", hasher.finalize())
}

/// SHA-256 of serialized intermediate JSON, as hex.
#[must_use]
pub fn json_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex(&hasher.finalize())
}

/// Serialize a JSON value with all object keys sorted, so logically
/// equal config subsets digest identically.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by_key(|(k, _)| k.as_str());
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    // serde_json::Map preserves insertion order, so inserting in sorted
    // order yields sorted serialization.
    sort(value).to_string()
}

/// The cache key for one step invocation.
#[must_use]
pub fn step_cache_key(step_name: &str, content_fingerprint: &str, config_subset: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(step_name.as_bytes());
    hasher.update(b":");
    hasher.update(content_fingerprint.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_json(config_subset).as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
