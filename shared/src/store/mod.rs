//! # The `Store` collaborator
//!
//! `Store` is the external contract this workspace treats the embedded
//! relational store through: an ordered-query, row-scan, atomic-write
//! interface. It is intentionally generic over a JSON-like
//! [`Row`] rather than typed per-entity structs, because the schema it
//! serves — arbitrary user-defined collections, not just the fixed
//! `_alyx_*` tables — is itself driven by a schema/rules DSL that is out
//! of scope for this workspace.
//!
//! Two implementations live under this module: [`sqlite::SqliteStore`], the
//! reference embedded implementation, and [`memory::InMemoryStore`], used
//! by this workspace's own unit and integration tests so that broker
//! delta math, scheduler next-fire computation, token validation order,
//! and rate-limiter windows can be proven correct without a real
//! file-backed database.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AlyxError;

/// A single stored row, represented generically as a JSON object.
pub type Row = serde_json::Map<String, Value>;

/// Sort direction for an ordered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// An equality/comparison predicate applied to a single field during a
/// row scan. Values are compared as their JSON representation — the
/// deliberate "string-coerced" behavior carried over from the realtime
/// filter table (see `realtime-service`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Eq(String),
    Ne(String),
    Gt(String),
    Gte(String),
    Lt(String),
    Lte(String),
}

/// A single `field OP value` predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
}

/// An ordered query against one collection.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Default for SortDirection {
    fn default() -> Self {
        Self::Ascending
    }
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_field = Some(field.into());
        self.sort_direction = direction;
        self
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp) -> Self {
        self.filters.push(Filter { field: field.into(), op });
        self
    }
}

/// The kind of mutation a [`ChangeRow`] records, mirroring the `Change`
/// entity's `operation` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// A single entry from the `_alyx_changes` table: a monotonically
/// increasing record of a mutation to some collection's row, consumed by
/// the realtime change detector.
#[derive(Debug, Clone)]
pub struct ChangeRow {
    pub id: i64,
    pub collection: String,
    pub operation: ChangeOperation,
    pub doc_id: String,
    pub changed_fields: Option<Vec<String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub processed: bool,
}

/// The embedded relational store, treated as a collaborator: ordered
/// query, row scan, atomic write.
#[async_trait]
pub trait Store: Send + Sync {
    /// Runs an ordered, filtered, paginated scan over a collection.
    async fn query(&self, q: Query) -> Result<Vec<Row>, AlyxError>;

    /// Fetches a single row by primary key, or `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Row>, AlyxError>;

    /// Inserts a new row, returning it as stored (including any
    /// server-assigned fields such as `id`/timestamps).
    async fn insert(&self, collection: &str, row: Row) -> Result<Row, AlyxError>;

    /// Applies a partial update (`patch`) to the row with the given id,
    /// returning the row as it exists after the update.
    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<Row, AlyxError>;

    /// Deletes the row with the given id. Idempotent: deleting an
    /// already-absent row is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), AlyxError>;

    /// Returns up to `limit` changes with `id > last_seen_id`, ordered by
    /// id ascending — the query the change detector polls with.
    async fn changes_after(&self, last_seen_id: i64, limit: i64) -> Result<Vec<ChangeRow>, AlyxError>;

    /// Marks every change with `id <= up_to_id` as processed.
    async fn mark_processed(&self, up_to_id: i64) -> Result<(), AlyxError>;
}
