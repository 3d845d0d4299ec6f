//! # Object backend collaborator
//!
//! `ObjectBackend` is the seam [`crate::upload_engine::UploadEngine`]
//! talks through: a streaming trait rather than a single-shot `Bytes`
//! upload/download, since chunked uploads and multipart S3 objects are
//! neither of them something that can be buffered whole in memory.
//!
//! Every method is scoped by `(bucket, key)`.

use std::pin::Pin;

use async_trait::async_trait;
use shared::errors::AlyxResult;
use tokio::io::AsyncRead;

/// A boxed, owned async byte stream. Callers get one from [`ObjectBackend::get`]
/// and read it to completion (or drop it early); nothing here assumes
/// `Sync`, only `Send` for crossing await points.
pub type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Streams `reader` into `(bucket, key)`. `size` is the caller's
    /// declared byte count (the upload's `size`, or the original size
    /// read back out of a `File` row) — backends that must decide
    /// single-shot vs. multipart (S3) use it as the decision threshold,
    /// not as a hard limit enforced here.
    async fn put(&self, bucket: &str, key: &str, reader: BoxedAsyncRead, size: u64) -> AlyxResult<u64>;

    /// Returns a streaming reader over the stored object.
    async fn get(&self, bucket: &str, key: &str) -> AlyxResult<BoxedAsyncRead>;

    /// Deletes `(bucket, key)`. Idempotent: deleting an absent object is
    /// not an error.
    async fn delete(&self, bucket: &str, key: &str) -> AlyxResult<()>;

    async fn exists(&self, bucket: &str, key: &str) -> AlyxResult<bool>;
}
