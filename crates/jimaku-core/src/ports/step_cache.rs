//! Port for the step cache: keyed memoization of expensive pipeline
//! sub-steps, backed by a key/value store with TTL.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by cache implementations. Cache failure is non-fatal
/// for callers: treat a failed read as a miss and ignore failed writes.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Keyed byte storage with expiry. Values are opaque step-specific JSON.
///
/// The cache does not coordinate writers: if two workers compute the
/// same key concurrently, the last `put` wins. Steps are required to be
/// idempotent, so either value is correct.
#[async_trait]
pub trait StepCachePort: Send + Sync {
    /// Fetch a live (unexpired) entry.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), CacheError>;
}
