//! # Storage domain entities
//!
//! `Upload` and `File` persist through `shared::store::Store`, the same
//! generic-row collaborator `auth-service`'s `User`/`Session` and
//! `scheduler-service`'s `Schedule` go through. `BucketConfig` is not
//! persisted — it is supplied by whatever embeds this crate (the schema
//! that would own it is an external collaborator) and consulted by the
//! upload engine for size/MIME admission.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An in-progress resumable upload. Invariant: `0 <= offset <= size`,
/// `offset` only ever grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub bucket: String,
    pub filename: Option<String>,
    pub size: u64,
    pub offset: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Upload {
    /// `expires_at = created_at + 24h` by default.
    pub fn new(id: String, bucket: String, size: u64, metadata: HashMap<String, String>, now: DateTime<Utc>) -> Self {
        let filename = metadata.get("filename").cloned();
        Self { id, bucket, filename, size, offset: 0, metadata, expires_at: now + chrono::Duration::hours(24), created_at: now }
    }

    pub fn is_complete(&self) -> bool {
        self.offset >= self.size
    }
}

/// A finalized, stored object. `(bucket, path)` is unique; `checksum` is
/// computed over the stored byte stream, not the pre-compression one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub bucket: String,
    pub name: String,
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub checksum: String,
    pub compressed: bool,
    pub compression_type: Option<String>,
    pub original_size: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-bucket policy consulted by [`crate::upload_engine::UploadEngine`].
/// Not a `shared::store` collaborator itself — the schema that would own
/// bucket definitions lives outside this crate — so this is handed
/// to the engine directly by its caller.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub name: String,
    pub max_file_size: u64,
    /// Patterns matched as follows: `*/*` matches everything,
    /// `prefix/*` matches by prefix, anything else matches exactly.
    /// Empty means "no restriction".
    pub allowed_mime_types: Vec<String>,
}

impl BucketConfig {
    pub fn new(name: impl Into<String>, max_file_size: u64) -> Self {
        Self { name: name.into(), max_file_size, allowed_mime_types: Vec::new() }
    }

    pub fn mime_type_allowed(&self, mime_type: &str) -> bool {
        if self.allowed_mime_types.is_empty() {
            return true;
        }
        self.allowed_mime_types.iter().any(|pattern| {
            if pattern == "*/*" {
                true
            } else if let Some(prefix) = pattern.strip_suffix("/*") {
                mime_type.starts_with(prefix) && mime_type.as_bytes().get(prefix.len()) == Some(&b'/')
            } else {
                pattern == mime_type
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_promotes_filename_from_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("filename".to_string(), "photo.png".to_string());
        let upload = Upload::new("u1".into(), "avatars".into(), 10, metadata, Utc::now());
        assert_eq!(upload.filename.as_deref(), Some("photo.png"));
        assert_eq!(upload.offset, 0);
    }

    #[test]
    fn upload_default_expiry_is_24_hours_out() {
        let now = Utc::now();
        let upload = Upload::new("u1".into(), "avatars".into(), 10, HashMap::new(), now);
        assert_eq!(upload.expires_at, now + chrono::Duration::hours(24));
    }

    #[test]
    fn mime_pattern_wildcard_matches_everything() {
        let bucket = BucketConfig { allowed_mime_types: vec!["*/*".to_string()], ..BucketConfig::new("b", 10) };
        assert!(bucket.mime_type_allowed("application/zip"));
    }

    #[test]
    fn mime_pattern_prefix_matches_by_type() {
        let bucket = BucketConfig { allowed_mime_types: vec!["image/*".to_string()], ..BucketConfig::new("b", 10) };
        assert!(bucket.mime_type_allowed("image/png"));
        assert!(!bucket.mime_type_allowed("video/mp4"));
        assert!(!bucket.mime_type_allowed("images/png"));
    }

    #[test]
    fn mime_pattern_exact_match_only() {
        let bucket = BucketConfig { allowed_mime_types: vec!["application/pdf".to_string()], ..BucketConfig::new("b", 10) };
        assert!(bucket.mime_type_allowed("application/pdf"));
        assert!(!bucket.mime_type_allowed("application/pdf2"));
    }

    #[test]
    fn no_restriction_when_list_is_empty() {
        let bucket = BucketConfig::new("b", 10);
        assert!(bucket.mime_type_allowed("anything/whatsoever"));
    }
}
