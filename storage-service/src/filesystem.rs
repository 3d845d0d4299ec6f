//! # Filesystem object backend
//!
//! Checksum-on-write, idempotent delete, empty-directory cleanup, and
//! explicit path-traversal validation before any path touches disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shared::errors::{AlyxError, AlyxResult};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::backend::{BoxedAsyncRead, ObjectBackend};

#[derive(Debug, Clone)]
pub struct FilesystemBackendConfig {
    pub base_path: PathBuf,
    /// Optional path segment inserted between `base_path` and `bucket`,
    /// e.g. a deployment-scoped namespace.
    pub prefix: Option<String>,
}

pub struct FilesystemBackend {
    config: FilesystemBackendConfig,
}

impl FilesystemBackend {
    pub fn new(config: FilesystemBackendConfig) -> Self {
        Self { config }
    }

    /// Resolves `(bucket, key)` to `{basePath}/{prefix?}{bucket}/{key}`,
    /// rejecting null bytes, absolute paths (Unix `/…` or Windows
    /// `C:\…`), any `..` path component, and any result that would not
    /// remain lexically under `base_path`.
    fn resolve(&self, bucket: &str, key: &str) -> AlyxResult<PathBuf> {
        validate_path_component(bucket)?;
        validate_path_component(key)?;

        let mut path = self.config.base_path.clone();
        if let Some(prefix) = &self.config.prefix {
            path.push(prefix);
        }
        path.push(bucket);
        path.push(key);

        if !path.starts_with(&self.config.base_path) {
            return Err(AlyxError::PathTraversal);
        }
        Ok(path)
    }

    async fn ensure_parent_dir(path: &Path) -> AlyxResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| AlyxError::Store(e.to_string()))?;
            set_dir_mode(parent).await;
        }
        Ok(())
    }

    /// Removes the file's parent directories, bottom-up, while they're
    /// empty, stopping at `base_path`.
    async fn cleanup_empty_dirs(&self, dir: &Path) -> AlyxResult<()> {
        if dir == self.config.base_path || !dir.starts_with(&self.config.base_path) {
            return Ok(());
        }
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        if entries.next_entry().await.ok().flatten().is_none() {
            if fs::remove_dir(dir).await.is_ok() {
                if let Some(parent) = dir.parent() {
                    Box::pin(self.cleanup_empty_dirs(parent)).await?;
                }
            }
        }
        Ok(())
    }
}

/// Rejects null bytes, absolute paths, and any `..` component in any
/// `/`- or `\`-separated segment of `component`.
fn validate_path_component(component: &str) -> AlyxResult<()> {
    if component.is_empty() || component.contains('\0') {
        return Err(AlyxError::PathTraversal);
    }
    if component.starts_with('/') || component.starts_with('\\') {
        return Err(AlyxError::PathTraversal);
    }
    // Windows drive-letter absolute path, e.g. `C:\Windows`.
    let bytes = component.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' {
        return Err(AlyxError::PathTraversal);
    }
    for part in component.split(['/', '\\']) {
        if part == ".." {
            return Err(AlyxError::PathTraversal);
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn set_file_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path).await {
        let mut perms = metadata.permissions();
        perms.set_mode(0o644);
        let _ = fs::set_permissions(path, perms).await;
    }
}

#[cfg(not(unix))]
async fn set_file_mode(_path: &Path) {}

#[cfg(unix)]
async fn set_dir_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path).await {
        let mut perms = metadata.permissions();
        perms.set_mode(0o755);
        let _ = fs::set_permissions(path, perms).await;
    }
}

#[cfg(not(unix))]
async fn set_dir_mode(_path: &Path) {}

#[async_trait]
impl ObjectBackend for FilesystemBackend {
    async fn put(&self, bucket: &str, key: &str, mut reader: BoxedAsyncRead, _size: u64) -> AlyxResult<u64> {
        let path = self.resolve(bucket, key)?;
        Self::ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        let written = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        file.flush().await.map_err(|e| AlyxError::Store(e.to_string()))?;
        set_file_mode(&path).await;

        debug!(bucket, key, written, "wrote object to filesystem backend");
        Ok(written)
    }

    async fn get(&self, bucket: &str, key: &str) -> AlyxResult<BoxedAsyncRead> {
        let path = self.resolve(bucket, key)?;
        let file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AlyxError::NotFound,
            _ => AlyxError::Store(e.to_string()),
        })?;
        Ok(Box::pin(file))
    }

    async fn delete(&self, bucket: &str, key: &str) -> AlyxResult<()> {
        let path = self.resolve(bucket, key)?;
        if fs::metadata(&path).await.is_err() {
            warn!(bucket, key, "delete of already-absent object, treating as success");
            return Ok(());
        }
        fs::remove_file(&path).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        if let Some(parent) = path.parent() {
            let _ = self.cleanup_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> AlyxResult<bool> {
        let path = self.resolve(bucket, key)?;
        Ok(fs::metadata(&path).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn backend(base: &Path) -> FilesystemBackend {
        FilesystemBackend::new(FilesystemBackendConfig { base_path: base.to_path_buf(), prefix: None })
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());

        let data = b"hello world".to_vec();
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(data.clone()));
        let written = backend.put("avatars", "a/b.txt", reader, data.len() as u64).await.unwrap();
        assert_eq!(written, data.len() as u64);

        let mut out = Vec::new();
        backend.get("avatars", "a/b.txt").await.unwrap().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        backend.delete("b", "missing.txt").await.unwrap();
        backend.delete("b", "missing.txt").await.unwrap();
    }

    #[tokio::test]
    async fn get_of_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let err = backend.get("b", "missing.txt").await.unwrap_err();
        assert!(matches!(err, AlyxError::NotFound));
    }

    #[tokio::test]
    async fn rejects_dot_dot_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        let err = backend.put("bucket", "../etc/passwd", reader, 1).await.unwrap_err();
        assert!(matches!(err, AlyxError::PathTraversal));
        assert!(!dir.path().parent().unwrap().join("etc/passwd").exists());
    }

    #[tokio::test]
    async fn rejects_absolute_unix_path() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        let err = backend.put("bucket", "/etc/passwd", reader, 1).await.unwrap_err();
        assert!(matches!(err, AlyxError::PathTraversal));
    }

    #[tokio::test]
    async fn rejects_windows_drive_path() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        let err = backend.put("bucket", r"C:\Windows\system.ini", reader, 1).await.unwrap_err();
        assert!(matches!(err, AlyxError::PathTraversal));
    }

    #[tokio::test]
    async fn rejects_null_byte() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        let err = backend.put("bucket", "a\0b", reader, 1).await.unwrap_err();
        assert!(matches!(err, AlyxError::PathTraversal));
    }

    #[tokio::test]
    async fn delete_cleans_up_empty_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let reader: BoxedAsyncRead = Box::pin(std::io::Cursor::new(b"x".to_vec()));
        backend.put("bucket", "nested/deep/file.txt", reader, 1).await.unwrap();
        backend.delete("bucket", "nested/deep/file.txt").await.unwrap();
        assert!(!dir.path().join("bucket/nested/deep").exists());
        assert!(!dir.path().join("bucket/nested").exists());
    }
}
