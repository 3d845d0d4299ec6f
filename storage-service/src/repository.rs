//! # Upload/file repository
//!
//! Data access for `Upload` and `File`, expressed over
//! `shared::store::Store` in the same `row_to`/`to_row` idiom as
//! `auth-service::repository::UserRepository` and
//! `scheduler-service::repository::ScheduleRepository`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::errors::{AlyxError, AlyxResult};
use shared::store::{FilterOp, Query, Row, Store};

use crate::domain::{File, Upload};

const UPLOADS_TABLE: &str = "_alyx_uploads";
const FILES_TABLE: &str = "_alyx_files";

fn row_to<T: serde::de::DeserializeOwned>(row: Row) -> AlyxResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| AlyxError::Internal(format!("row decode failed: {e}")))
}

fn to_row<T: serde::Serialize>(value: &T) -> AlyxResult<Row> {
    match serde_json::to_value(value).map_err(|e| AlyxError::Internal(format!("row encode failed: {e}")))? {
        Value::Object(map) => Ok(map),
        _ => Err(AlyxError::Internal("expected an object".into())),
    }
}

#[derive(Clone)]
pub struct UploadRepository {
    store: Arc<dyn Store>,
}

impl UploadRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, upload: Upload) -> AlyxResult<Upload> {
        let row = to_row(&upload)?;
        let stored = self.store.insert(UPLOADS_TABLE, row).await?;
        row_to(stored)
    }

    pub async fn find_by_id(&self, id: &str) -> AlyxResult<Option<Upload>> {
        match self.store.get(UPLOADS_TABLE, id).await? {
            Some(row) => Ok(Some(row_to(row)?)),
            None => Ok(None),
        }
    }

    pub async fn update(&self, id: &str, patch: Row) -> AlyxResult<Upload> {
        let stored = self.store.update(UPLOADS_TABLE, id, patch).await?;
        row_to(stored)
    }

    pub async fn delete(&self, id: &str) -> AlyxResult<()> {
        self.store.delete(UPLOADS_TABLE, id).await
    }

    /// Uploads whose `expires_at` has passed, for
    /// the expired-upload sweep.
    pub async fn find_expired(&self, now: DateTime<Utc>) -> AlyxResult<Vec<Upload>> {
        let query = Query::new(UPLOADS_TABLE).filter("expires_at", FilterOp::Lt(iso(now)));
        let rows = self.store.query(query).await?;
        rows.into_iter().map(row_to::<Upload>).collect()
    }
}

#[derive(Clone)]
pub struct FileRepository {
    store: Arc<dyn Store>,
}

impl FileRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, file: File) -> AlyxResult<File> {
        let row = to_row(&file)?;
        let stored = self.store.insert(FILES_TABLE, row).await?;
        row_to(stored)
    }

    pub async fn find_by_id(&self, id: &str) -> AlyxResult<Option<File>> {
        match self.store.get(FILES_TABLE, id).await? {
            Some(row) => Ok(Some(row_to(row)?)),
            None => Ok(None),
        }
    }

    /// Enforces the `(bucket, path)` uniqueness invariant
    /// at the application layer, since `Store` exposes no native unique
    /// index declaration.
    pub async fn find_by_bucket_and_path(&self, bucket: &str, path: &str) -> AlyxResult<Option<File>> {
        let query = Query::new(FILES_TABLE)
            .filter("bucket", FilterOp::Eq(bucket.to_string()))
            .filter("path", FilterOp::Eq(path.to_string()))
            .with_limit(1);
        let rows = self.store.query(query).await?;
        rows.into_iter().next().map(row_to::<File>).transpose()
    }

    pub async fn delete(&self, id: &str) -> AlyxResult<()> {
        self.store.delete(FILES_TABLE, id).await
    }

    /// All files in `bucket`, unordered. Used by index/admin listing and
    /// by this crate's own tests to assert on a just-finalized upload
    /// without needing to know its generated object key in advance.
    pub async fn list_by_bucket(&self, bucket: &str) -> AlyxResult<Vec<File>> {
        let query = Query::new(FILES_TABLE).filter("bucket", FilterOp::Eq(bucket.to_string()));
        let rows = self.store.query(query).await?;
        rows.into_iter().map(row_to::<File>).collect()
    }
}

fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shared::store::memory::InMemoryStore;
    use std::collections::HashMap;

    fn upload(id: &str, expires_at: DateTime<Utc>) -> Upload {
        Upload {
            id: id.to_string(),
            bucket: "avatars".to_string(),
            filename: None,
            size: 100,
            offset: 0,
            metadata: HashMap::new(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_find_by_id() {
        let repo = UploadRepository::new(Arc::new(InMemoryStore::new()));
        let created = repo.create(upload("u1", Utc::now() + Duration::hours(24))).await.unwrap();
        let found = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(found.bucket, "avatars");
    }

    #[tokio::test]
    async fn find_expired_only_returns_past_expiry() {
        let repo = UploadRepository::new(Arc::new(InMemoryStore::new()));
        let now = Utc::now();
        repo.create(upload("expired", now - Duration::hours(1))).await.unwrap();
        repo.create(upload("live", now + Duration::hours(1))).await.unwrap();

        let expired = repo.find_expired(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "expired");
    }

    #[tokio::test]
    async fn file_unique_bucket_path_lookup() {
        let repo = FileRepository::new(Arc::new(InMemoryStore::new()));
        let file = File {
            id: "f1".to_string(),
            bucket: "avatars".to_string(),
            name: "photo.png".to_string(),
            path: "avatars/photo.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 10,
            checksum: "abc".to_string(),
            compressed: false,
            compression_type: None,
            original_size: 10,
            metadata: HashMap::new(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.create(file).await.unwrap();

        let found = repo.find_by_bucket_and_path("avatars", "avatars/photo.png").await.unwrap();
        assert!(found.is_some());
        let missing = repo.find_by_bucket_and_path("avatars", "nope").await.unwrap();
        assert!(missing.is_none());
    }
}
