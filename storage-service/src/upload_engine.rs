//! # Resumable upload engine (C5)
//!
//! Implements the resumable upload lifecycle: `create_upload`, `get_upload_offset`,
//! `upload_chunk` (offset reconciliation against a temp file at
//! `{tmp}/tus/{id}`, MIME sniff + checksum + `File` creation on
//! completion), `cancel_upload`, and `cleanup_expired_uploads` (a
//! [`BackgroundWorker`] sweep, matching the lifecycle shape
//! `scheduler-service::Scheduler::start` already establishes in this
//! workspace).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use sha2::{Digest, Sha256};
use shared::errors::{AlyxError, AlyxResult};
use shared::lifecycle::BackgroundWorker;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{BoxedAsyncRead, ObjectBackend};
use crate::compress::CompressionKind;
use crate::domain::{BucketConfig, File, Upload};
use crate::repository::{FileRepository, UploadRepository};

/// Bytes read from the temp file before MIME sniffing (first 512 bytes).
const MIME_SNIFF_BYTES: usize = 512;

pub struct UploadEngine {
    upload_repo: UploadRepository,
    file_repo: FileRepository,
    backend: Arc<dyn ObjectBackend>,
    buckets: Arc<HashMap<String, BucketConfig>>,
    tmp_dir: PathBuf,
    compression: Option<CompressionKind>,
    worker: Option<BackgroundWorker>,
}

impl UploadEngine {
    pub fn new(
        upload_repo: UploadRepository,
        file_repo: FileRepository,
        backend: Arc<dyn ObjectBackend>,
        buckets: HashMap<String, BucketConfig>,
        tmp_dir: PathBuf,
        compression: Option<CompressionKind>,
    ) -> Self {
        Self { upload_repo, file_repo, backend, buckets: Arc::new(buckets), tmp_dir, compression, worker: None }
    }

    fn tmp_path(&self, upload_id: &str) -> PathBuf {
        self.tmp_dir.join("tus").join(upload_id)
    }

    fn bucket_config(&self, bucket: &str) -> Option<&BucketConfig> {
        self.buckets.get(bucket)
    }

    /// Creates a new upload. Rejects
    /// oversized requests against the bucket's `max_file_size`;
    /// `metadata["filename"]` is promoted to `Upload::filename`.
    pub async fn create_upload(&self, bucket: &str, size: u64, metadata: HashMap<String, String>) -> AlyxResult<Upload> {
        if let Some(cfg) = self.bucket_config(bucket) {
            if size > cfg.max_file_size {
                return Err(AlyxError::SizeExceeded);
            }
        }
        let id = Uuid::new_v4().to_string();
        let upload = Upload::new(id, bucket.to_string(), size, metadata, Utc::now());
        self.upload_repo.create(upload).await
    }

    async fn find_upload(&self, bucket: &str, id: &str) -> AlyxResult<Upload> {
        let upload = self.upload_repo.find_by_id(id).await?.ok_or_else(|| AlyxError::UploadNotFound(id.to_string()))?;
        if upload.bucket != bucket {
            return Err(AlyxError::UploadNotFound(id.to_string()));
        }
        Ok(upload)
    }

    pub async fn get_upload_offset(&self, bucket: &str, id: &str) -> AlyxResult<u64> {
        Ok(self.find_upload(bucket, id).await?.offset)
    }

    /// Appends one chunk to an in-progress upload. Requires
    /// `offset == upload.offset`; appends exactly
    /// `chunk_size` bytes to the temp file, advances the persisted
    /// offset, and finalizes into a `File` once the upload completes.
    pub async fn upload_chunk<R>(&self, bucket: &str, id: &str, offset: u64, reader: R, chunk_size: u64) -> AlyxResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let upload = self.find_upload(bucket, id).await?;
        if offset != upload.offset {
            return Err(AlyxError::OffsetMismatch { expected: upload.offset, actual: offset });
        }

        let tmp_path = self.tmp_path(id);
        if let Some(parent) = tmp_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&tmp_path)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;

        let mut limited = reader.take(chunk_size);
        let written = tokio::io::copy(&mut limited, &mut file).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        file.flush().await.map_err(|e| AlyxError::Store(e.to_string()))?;

        if written != chunk_size {
            return Err(AlyxError::Store(format!("chunk write incomplete: expected {chunk_size} bytes, wrote {written}")));
        }

        let new_offset = offset + chunk_size;
        let mut patch = shared::store::Row::new();
        patch.insert("offset".to_string(), json!(new_offset));
        let updated = self.upload_repo.update(id, patch).await?;

        if new_offset >= updated.size {
            self.finalize(bucket, &updated).await?;
        }

        Ok(new_offset)
    }

    /// Finalize sequence: MIME-sniff, check the
    /// bucket's allowed patterns, stream the temp file into the object
    /// backend while hashing it, create the `File` row (rolling back the
    /// backend write on metadata-write failure), then delete the
    /// `Upload` row and temp file.
    async fn finalize(&self, bucket: &str, upload: &Upload) -> AlyxResult<File> {
        let tmp_path = self.tmp_path(&upload.id);

        let mime_type = sniff_mime_type(&tmp_path).await?;
        if let Some(cfg) = self.bucket_config(bucket) {
            if !cfg.mime_type_allowed(&mime_type) {
                return Err(AlyxError::MimeTypeNotAllowed(mime_type));
            }
        }

        let hasher = Arc::new(Mutex::new(Sha256::new()));
        let source = fs::File::open(&tmp_path).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        let hashing: BoxedAsyncRead = Box::pin(HashingReader { inner: source, hasher: hasher.clone() });

        let filename = upload.filename.clone().unwrap_or_else(|| upload.id.clone());
        let object_key = format!("{}-{}", Uuid::new_v4(), filename);

        let written = self.backend.put(bucket, &object_key, hashing, upload.size).await?;
        let checksum = hex::encode(hasher.lock().clone().finalize());

        let now = Utc::now();
        let file = File {
            id: Uuid::new_v4().to_string(),
            bucket: bucket.to_string(),
            name: filename,
            path: object_key.clone(),
            mime_type,
            size: written,
            checksum,
            compressed: self.compression.is_some(),
            compression_type: self.compression.map(|k| k.to_string()),
            original_size: written,
            metadata: upload.metadata.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
        };

        match self.file_repo.create(file).await {
            Ok(created) => {
                self.upload_repo.delete(&upload.id).await?;
                let _ = fs::remove_file(&tmp_path).await;
                Ok(created)
            }
            Err(err) => {
                warn!(bucket, upload_id = %upload.id, error = %err, "file metadata write failed, rolling back backend object");
                let _ = self.backend.delete(bucket, &object_key).await;
                Err(err)
            }
        }
    }

    /// Deletes the `Upload` row and its temp file. Idempotent in both
    /// halves: an absent row or an absent temp file is not an error.
    pub async fn cancel_upload(&self, bucket: &str, id: &str) -> AlyxResult<()> {
        if let Some(upload) = self.upload_repo.find_by_id(id).await? {
            if upload.bucket == bucket {
                self.upload_repo.delete(id).await?;
            }
        }
        let _ = fs::remove_file(self.tmp_path(id)).await;
        Ok(())
    }

    /// One sweep of the expired-upload cleanup: every upload
    /// with `expires_at < now` is canceled. Returns the count removed.
    pub async fn cleanup_once(&self) -> AlyxResult<usize> {
        let expired = self.upload_repo.find_expired(Utc::now()).await?;
        for upload in &expired {
            self.cancel_upload(&upload.bucket, &upload.id).await?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "cleaned up expired uploads");
        }
        Ok(expired.len())
    }

    /// Spawns the background sweep at `interval`, using the shared
    /// background-worker lifecycle: done-signal, idempotent stop.
    pub fn start_cleanup_sweeper(&mut self, interval: StdDuration) {
        let upload_repo = self.upload_repo.clone();
        let tmp_dir = self.tmp_dir.clone();

        self.worker = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = sweep_expired(&upload_repo, &tmp_dir).await {
                            warn!(error = %err, "upload cleanup sweep failed");
                        }
                    }
                }
            }
        }));
    }

    pub fn stop_cleanup_sweeper(&self) {
        if let Some(worker) = &self.worker {
            worker.stop();
        }
    }
}

async fn sweep_expired(upload_repo: &UploadRepository, tmp_dir: &Path) -> AlyxResult<()> {
    let expired = upload_repo.find_expired(Utc::now()).await?;
    for upload in expired {
        upload_repo.delete(&upload.id).await?;
        let _ = fs::remove_file(tmp_dir.join("tus").join(&upload.id)).await;
    }
    Ok(())
}

/// Reads up to [`MIME_SNIFF_BYTES`] from the start of `path` and sniffs
/// the MIME type via `infer`, defaulting to `application/octet-stream`
/// when no signature matches (empty or opaque files).
async fn sniff_mime_type(path: &Path) -> AlyxResult<String> {
    let mut file = fs::File::open(path).await.map_err(|e| AlyxError::Store(e.to_string()))?;
    let mut buf = vec![0u8; MIME_SNIFF_BYTES];
    let mut filled = 0usize;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);

    Ok(infer::get(&buf).map(|kind| kind.mime_type().to_string()).unwrap_or_else(|| "application/octet-stream".to_string()))
}

/// Wraps an `AsyncRead` to accumulate a running SHA-256 digest of every
/// byte that passes through, so the checksum can be computed in the same
/// pass as the upload to the object backend.
struct HashingReader<R> {
    inner: R,
    hasher: Arc<Mutex<Sha256>>,
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let inner = Pin::new(&mut this.inner);
        match inner.poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let after = buf.filled().len();
                if after > before {
                    this.hasher.lock().update(&buf.filled()[before..after]);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ObjectBackend;
    use crate::filesystem::{FilesystemBackend, FilesystemBackendConfig};
    use shared::store::memory::InMemoryStore;
    use std::io::Cursor;

    fn engine(tmp: &Path, buckets: HashMap<String, BucketConfig>) -> (UploadEngine, FileRepository) {
        let store = Arc::new(InMemoryStore::new());
        let backend: Arc<dyn ObjectBackend> =
            Arc::new(FilesystemBackend::new(FilesystemBackendConfig { base_path: tmp.join("objects"), prefix: None }));
        let file_repo = FileRepository::new(store.clone());
        let engine = UploadEngine::new(
            UploadRepository::new(store),
            file_repo.clone(),
            backend,
            buckets,
            tmp.to_path_buf(),
            None,
        );
        (engine, file_repo)
    }

    #[tokio::test]
    async fn full_upload_finalizes_with_matching_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, file_repo) = engine(dir.path(), HashMap::new());

        let upload = engine.create_upload("docs", 10, HashMap::new()).await.unwrap();
        let offset = engine
            .upload_chunk("docs", &upload.id, 0, Cursor::new(b"hello".to_vec()), 5)
            .await
            .unwrap();
        assert_eq!(offset, 5);

        let offset = engine
            .upload_chunk("docs", &upload.id, 5, Cursor::new(b"world".to_vec()), 5)
            .await
            .unwrap();
        assert_eq!(offset, 10);

        // Upload row is gone once finalized.
        assert!(engine.upload_repo.find_by_id(&upload.id).await.unwrap().is_none());

        let expected_checksum = {
            let mut hasher = Sha256::new();
            hasher.update(b"helloworld");
            hex::encode(hasher.finalize())
        };

        let files = file_repo.list_by_bucket("docs").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].checksum, expected_checksum);
        assert_eq!(files[0].size, 10);
    }

    #[tokio::test]
    async fn offset_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), HashMap::new());
        let upload = engine.create_upload("docs", 10, HashMap::new()).await.unwrap();

        let err = engine.upload_chunk("docs", &upload.id, 3, Cursor::new(b"xxxxx".to_vec()), 5).await.unwrap_err();
        assert!(matches!(err, AlyxError::OffsetMismatch { expected: 0, actual: 3 }));
    }

    #[tokio::test]
    async fn create_upload_rejects_oversized_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut buckets = HashMap::new();
        buckets.insert("avatars".to_string(), BucketConfig::new("avatars", 100));
        let engine = engine(dir.path(), buckets);

        let err = engine.create_upload("avatars", 1_000, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, AlyxError::SizeExceeded));
    }

    #[tokio::test]
    async fn cancel_upload_removes_row_and_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), HashMap::new());
        let upload = engine.create_upload("docs", 10, HashMap::new()).await.unwrap();
        engine.upload_chunk("docs", &upload.id, 0, Cursor::new(b"hello".to_vec()), 5).await.unwrap();

        engine.cancel_upload("docs", &upload.id).await.unwrap();
        assert!(engine.upload_repo.find_by_id(&upload.id).await.unwrap().is_none());
        assert!(!engine.tmp_path(&upload.id).exists());
    }

    #[tokio::test]
    async fn cleanup_once_removes_only_expired_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), HashMap::new());
        let mut upload = engine.create_upload("docs", 10, HashMap::new()).await.unwrap();

        let mut patch = shared::store::Row::new();
        patch.insert("expires_at".to_string(), json!(Utc::now() - chrono::Duration::hours(1)));
        upload = engine.upload_repo.update(&upload.id, patch).await.unwrap();

        let removed = engine.cleanup_once().await.unwrap();
        assert_eq!(removed, 1);
        assert!(engine.upload_repo.find_by_id(&upload.id).await.unwrap().is_none());
    }
}
