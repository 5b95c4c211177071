//! Port for the content-addressed blob store (media and artifacts).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by blob store implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Put/get/exists/presign over one bucket. Keys are application-chosen
/// paths (`<sanitized-title>/<filename>`); bucket creation is idempotent
/// at construction time.
#[async_trait]
pub trait BlobStorePort: Send + Sync {
    async fn put_bytes(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Upload a local file under `key`, inferring the content type from
    /// the file extension. Returns the key.
    async fn upload_file(&self, path: &Path, key: &str) -> Result<String, StorageError>;

    async fn download_to(&self, key: &str, dest: &Path) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Time-limited URL for direct client access to `key`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Resolve a reference that may be either a blob key or a local
/// filesystem path to a readable local path.
///
/// The blob store is probed first, then the local filesystem — callers
/// migrating from local-only deployments pass one string and this
/// decides. Blob objects are materialized into `scratch_dir`.
pub async fn resolve_to_local(
    blob: &dyn BlobStorePort,
    reference: &str,
    scratch_dir: &Path,
) -> Result<PathBuf, StorageError> {
    if blob.exists(reference).await? {
        let file_name = Path::new(reference)
            .file_name()
            .map_or_else(|| "blob.bin".into(), std::ffi::OsStr::to_os_string);
        let dest = scratch_dir.join(file_name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        }
        blob.download_to(reference, &dest).await?;
        tracing::debug!(key = reference, dest = %dest.display(), "materialized blob to scratch");
        return Ok(dest);
    }

    let local = Path::new(reference);
    if local.exists() {
        return Ok(local.to_path_buf());
    }

    Err(StorageError::NotFound(reference.to_string()))
}
