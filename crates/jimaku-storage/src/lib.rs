//! Filesystem-bucket implementation of the blob store gateway.
//!
//! One root directory plays the role of the bucket; keys are
//! application-chosen relative paths (`<sanitized-title>/<filename>`).
//! The port mirrors an object-store contract (put/get/exists/presign,
//! content-type inference) so an S3-backed gateway can replace this one
//! without touching callers.

#![deny(unsafe_code)]

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use jimaku_core::{BlobStorePort, StorageError};

/// Infer a content type from a key or file name extension.
#[must_use]
pub fn content_type_for(key: &str) -> &'static str {
    match Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("wav") => "audio/wav",
        Some("srt" | "ass" | "txt") => "text/plain",
        Some("vtt") => "text/vtt",
        Some("json") => "application/json",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Blob store over a local directory tree.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create, idempotently) the bucket directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self { root })
    }

    /// Map a key to its on-disk path, rejecting traversal outside the
    /// bucket.
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StorageError::PermissionDenied(format!(
                "key escapes bucket: {key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn map_io(key: &str, e: &std::io::Error) -> StorageError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(key.to_string()),
        _ => StorageError::Unavailable(e.to_string()),
    }
}

#[async_trait]
impl BlobStorePort for FsBlobStore {
    async fn put_bytes(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(key, &e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| map_io(key, &e))?;
        tracing::debug!(key, size = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| map_io(key, &e))
    }

    async fn upload_file(&self, path: &Path, key: &str) -> Result<String, StorageError> {
        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(key, &e))?;
        }
        tokio::fs::copy(path, &dest)
            .await
            .map_err(|e| map_io(key, &e))?;
        tracing::debug!(
            key,
            source = %path.display(),
            content_type = content_type_for(key),
            "uploaded file"
        );
        Ok(key.to_string())
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let source = self.object_path(key)?;
        if !source.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(key, &e))?;
        }
        tokio::fs::copy(&source, dest)
            .await
            .map_err(|e| map_io(key, &e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.object_path(key)?.is_file())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let expires = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Ok(format!("file://{}?expires={expires}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jimaku_core::ports::blob_store::resolve_to_local;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsBlobStore) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("bucket")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        store
            .put_bytes("title/audio.mp3", b"bytes", "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(store.get_bytes("title/audio.mp3").await.unwrap(), b"bytes");
        assert!(store.exists("title/audio.mp3").await.unwrap());
        assert!(!store.exists("title/missing.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.get_bytes("nope.json").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_and_download_file() {
        let (dir, store) = store();
        let local = dir.path().join("in.json");
        tokio::fs::write(&local, b"{}").await.unwrap();

        let key = store.upload_file(&local, "out/result.json").await.unwrap();
        assert_eq!(key, "out/result.json");

        let dest = dir.path().join("fetched/result.json");
        store.download_to("out/result.json", &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_key_traversal_is_rejected() {
        let (_dir, store) = store();
        let err = store.get_bytes("../escape.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::PermissionDenied(_)));
        let err = store.get_bytes("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_presign_points_at_the_object() {
        let (_dir, store) = store();
        store.put_bytes("a/b.json", b"{}", "application/json").await.unwrap();
        let url = store
            .presign_get("a/b.json", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.contains("b.json?expires="));
    }

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type_for("x/audio.MP3"), "audio/mpeg");
        assert_eq!(content_type_for("x/result.json"), "application/json");
        assert_eq!(content_type_for("x/sub.srt"), "text/plain");
        assert_eq!(content_type_for("x/unknown.bin"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_dual_addressing_prefers_blob_then_local() {
        let (dir, store) = store();
        let scratch = dir.path().join("scratch");

        // A blob key resolves by materializing to scratch.
        store
            .put_bytes("t/audio.mp3", b"blob-bytes", "audio/mpeg")
            .await
            .unwrap();
        let resolved = resolve_to_local(&store, "t/audio.mp3", &scratch)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&resolved).await.unwrap(), b"blob-bytes");
        assert!(resolved.starts_with(&scratch));

        // A plain local path resolves to itself.
        let local = dir.path().join("local.mp3");
        tokio::fs::write(&local, b"local-bytes").await.unwrap();
        let resolved = resolve_to_local(&store, local.to_str().unwrap(), &scratch)
            .await
            .unwrap();
        assert_eq!(resolved, local);

        // Neither: NotFound.
        let err = resolve_to_local(&store, "missing-everywhere", &scratch)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
