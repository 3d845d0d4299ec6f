//! Cross-module integration coverage: a full upload engine wired to a
//! real `FilesystemBackend` (optionally wrapped in `CompressingBackend`),
//! backed by an in-memory store — the same "wire it all up against the
//! in-memory collaborators" shape `scheduler-service`'s and
//! `realtime-service`'s own crates use for their integration-style
//! tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use shared::store::memory::InMemoryStore;
use storage_service::backend::ObjectBackend;
use storage_service::compress::{CompressingBackend, CompressionKind};
use storage_service::filesystem::{FilesystemBackend, FilesystemBackendConfig};
use storage_service::repository::{FileRepository, UploadRepository};
use storage_service::{BucketConfig, UploadEngine};

fn engine_with_backend(
    tmp: &std::path::Path,
    backend: Arc<dyn ObjectBackend>,
    buckets: HashMap<String, BucketConfig>,
    compression: Option<CompressionKind>,
) -> (UploadEngine, FileRepository) {
    let store = Arc::new(InMemoryStore::new());
    let file_repo = FileRepository::new(store.clone());
    let engine = UploadEngine::new(
        UploadRepository::new(store),
        file_repo.clone(),
        backend,
        buckets,
        tmp.to_path_buf(),
        compression,
    );
    (engine, file_repo)
}

#[tokio::test]
async fn finalize_rejects_mime_type_outside_bucket_allow_list() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn ObjectBackend> =
        Arc::new(FilesystemBackend::new(FilesystemBackendConfig { base_path: dir.path().join("objects"), prefix: None }));

    let mut images_only = BucketConfig::new("avatars", 10_000);
    images_only.allowed_mime_types = vec!["image/*".to_string()];
    let mut buckets = HashMap::new();
    buckets.insert("avatars".to_string(), images_only);

    let (engine, _files) = engine_with_backend(dir.path(), backend, buckets, None);

    // A PNG signature (content-sniffed, not a filename-based guess).
    let png_bytes: Vec<u8> = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];
    let upload = engine.create_upload("avatars", png_bytes.len() as u64, HashMap::new()).await.unwrap();
    engine
        .upload_chunk("avatars", &upload.id, 0, Cursor::new(png_bytes.clone()), png_bytes.len() as u64)
        .await
        .unwrap();

    // A plain-text payload, rejected by the `image/*` allow-list.
    let text_bytes = b"just some text, not an image".to_vec();
    let upload2 = engine.create_upload("avatars", text_bytes.len() as u64, HashMap::new()).await.unwrap();
    let err = engine
        .upload_chunk("avatars", &upload2.id, 0, Cursor::new(text_bytes.clone()), text_bytes.len() as u64)
        .await
        .unwrap_err();
    assert!(matches!(err, shared::errors::AlyxError::MimeTypeNotAllowed(_)));

    // The rejected upload's row survives (finalize failed, nothing to
    // delete); the accepted one does not.
    assert!(engine.get_upload_offset("avatars", &upload2.id).await.is_ok());
    assert!(engine.get_upload_offset("avatars", &upload.id).await.is_err());
}

#[tokio::test]
async fn compressing_backend_round_trips_through_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let fs_backend: Box<dyn ObjectBackend> =
        Box::new(FilesystemBackend::new(FilesystemBackendConfig { base_path: dir.path().to_path_buf(), prefix: None }));
    let compressing = CompressingBackend::new(fs_backend, CompressionKind::Gzip);

    let payload = b"the quick brown fox jumps over the lazy dog".repeat(50);
    let reader: storage_service::backend::BoxedAsyncRead = Box::pin(Cursor::new(payload.clone()));
    compressing.put("bucket", "key.txt", reader, payload.len() as u64).await.unwrap();

    let mut out = Vec::new();
    use tokio::io::AsyncReadExt;
    compressing.get("bucket", "key.txt").await.unwrap().read_to_end(&mut out).await.unwrap();

    assert_eq!(out, payload);
}

#[tokio::test]
async fn cleanup_sweeper_leaves_live_uploads_alone() {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn ObjectBackend> =
        Arc::new(FilesystemBackend::new(FilesystemBackendConfig { base_path: dir.path().join("objects"), prefix: None }));
    let (mut engine, _files) = engine_with_backend(dir.path(), backend, HashMap::new(), None);

    // Fresh uploads default to a 24h expiry; the sweeper
    // must not touch them.
    let upload = engine.create_upload("docs", 10, HashMap::new()).await.unwrap();

    engine.start_cleanup_sweeper(std::time::Duration::from_millis(5));
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    engine.stop_cleanup_sweeper();

    assert!(engine.get_upload_offset("docs", &upload.id).await.is_ok());
}
