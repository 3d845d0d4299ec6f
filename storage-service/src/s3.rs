//! # S3 object backend
//!
//! Below 5 MiB uses a single `PutObject`;
//! at or above, a multipart upload with 5 MiB parts, aborting on any
//! per-part error.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use async_trait::async_trait;
use shared::errors::{AlyxError, AlyxResult};
use tokio::io::AsyncReadExt;

use crate::backend::{BoxedAsyncRead, ObjectBackend};

const MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;
const PART_SIZE: usize = 5 * 1024 * 1024;

pub struct S3Backend {
    client: Client,
    /// The single underlying S3 bucket this backend writes to; Alyx's
    /// logical `bucket` argument becomes a key prefix, the same way
    /// `FilesystemBackend` treats it as a subdirectory.
    s3_bucket: String,
}

impl S3Backend {
    pub fn new(client: Client, s3_bucket: String) -> Self {
        Self { client, s3_bucket }
    }

    /// Builds a client from the standard AWS environment/credential chain
    /// (`AWS_REGION`, `AWS_ACCESS_KEY_ID`, instance/role credentials, …).
    pub async fn from_env(s3_bucket: String) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), s3_bucket)
    }

    fn object_key(&self, bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    async fn put_single(&self, object_key: &str, mut reader: BoxedAsyncRead, size: u64) -> AlyxResult<u64> {
        let mut buf = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut buf).await.map_err(|e| AlyxError::Store(e.to_string()))?;
        let written = buf.len() as u64;
        self.client
            .put_object()
            .bucket(&self.s3_bucket)
            .key(object_key)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;
        Ok(written)
    }

    async fn put_multipart(&self, object_key: &str, mut reader: BoxedAsyncRead) -> AlyxResult<u64> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.s3_bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;
        let upload_id = create.upload_id().ok_or_else(|| AlyxError::Store("missing upload id".into()))?.to_string();

        let result = self.upload_parts(object_key, &upload_id, &mut reader).await;

        match result {
            Ok((parts, total)) => {
                let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder().set_parts(Some(parts)).build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.s3_bucket)
                    .key(object_key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| AlyxError::Store(e.to_string()))?;
                Ok(total)
            }
            Err(e) => {
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.s3_bucket)
                    .key(object_key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        object_key: &str,
        upload_id: &str,
        reader: &mut BoxedAsyncRead,
    ) -> AlyxResult<(Vec<aws_sdk_s3::types::CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut part_number = 1i32;

        loop {
            let mut chunk = vec![0u8; PART_SIZE];
            let mut filled = 0usize;
            while filled < PART_SIZE {
                let n = reader.read(&mut chunk[filled..]).await.map_err(|e| AlyxError::Store(e.to_string()))?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            chunk.truncate(filled);
            total += filled as u64;

            let part = self
                .client
                .upload_part()
                .bucket(&self.s3_bucket)
                .key(object_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| AlyxError::Store(e.to_string()))?;

            parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .e_tag(part.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;

            if filled < PART_SIZE {
                break;
            }
        }

        Ok((parts, total))
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put(&self, bucket: &str, key: &str, reader: BoxedAsyncRead, size: u64) -> AlyxResult<u64> {
        let object_key = self.object_key(bucket, key);
        if size < MULTIPART_THRESHOLD {
            self.put_single(&object_key, reader, size).await
        } else {
            self.put_multipart(&object_key, reader).await
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> AlyxResult<BoxedAsyncRead> {
        let object_key = self.object_key(bucket, key);
        let output = self
            .client
            .get_object()
            .bucket(&self.s3_bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                if is_get_not_found(&e) {
                    AlyxError::NotFound
                } else {
                    AlyxError::Store(e.to_string())
                }
            })?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn delete(&self, bucket: &str, key: &str) -> AlyxResult<()> {
        let object_key = self.object_key(bucket, key);
        self.client
            .delete_object()
            .bucket(&self.s3_bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> AlyxResult<bool> {
        let object_key = self.object_key(bucket, key);
        match self.client.head_object().bucket(&self.s3_bucket).key(&object_key).send().await {
            Ok(_) => Ok(true),
            Err(e) if is_head_not_found(&e) => Ok(false),
            Err(e) => Err(AlyxError::Store(e.to_string())),
        }
    }
}

/// `GetObject` on a missing key fails with the typed `NoSuchKey` variant;
/// checked via its generated `is_no_such_key` accessor rather than by
/// matching error text.
fn is_get_not_found(err: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>) -> bool {
    err.as_service_error().is_some_and(|e| e.is_no_such_key())
}

/// `HeadObject` on a missing key fails with the typed `NotFound` variant
/// (S3 never returns a body to identify the key as `NoSuchKey` for HEAD
/// requests); checked via its generated `is_not_found` accessor.
fn is_head_not_found(err: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>) -> bool {
    err.as_service_error().is_some_and(|e| e.is_not_found())
}
