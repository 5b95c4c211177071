//! Step-cache access helpers.
//!
//! Cache failure is non-fatal by contract: a failed read is a miss, a
//! failed write is dropped, both with a warning.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use jimaku_core::StepCachePort;

pub(crate) async fn get_json<T: DeserializeOwned>(
    cache: &dyn StepCachePort,
    namespace: &str,
    key: &str,
) -> Option<T> {
    match cache.get(namespace, key).await {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(namespace, key, error = %e, "corrupt cache entry, ignoring");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(namespace, key, error = %e, "cache read failed, treating as miss");
            None
        }
    }
}

pub(crate) async fn put_json<T: Serialize>(
    cache: &dyn StepCachePort,
    namespace: &str,
    key: &str,
    value: &T,
    ttl: Duration,
) {
    let Ok(bytes) = serde_json::to_vec(value) else {
        return;
    };
    if let Err(e) = cache.put(namespace, key, &bytes, ttl).await {
        tracing::warn!(namespace, key, error = %e, "cache write failed, continuing");
    }
}
