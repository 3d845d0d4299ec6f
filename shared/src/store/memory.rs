//! # In-memory `Store`
//!
//! A `parking_lot::RwLock`-guarded in-process store, using explicit locks
//! over std collections rather than reaching for a concurrent-map crate.
//! This is the `Store` this
//! workspace's own tests run against: none of the logic under test here
//! (broker delta computation, scheduler next-fire math, token validation
//! ordering, rate-limiter windows) depends on a real file-backed database,
//! so exercising it through an in-memory store keeps those tests fast and
//! deterministic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::AlyxError;

use super::{ChangeOperation, ChangeRow, FilterOp, Query, Row, SortDirection, Store};

#[derive(Default)]
struct Collection {
    rows: BTreeMap<String, Row>,
}

/// An in-memory `Store`, suitable for tests and for single-process
/// experimentation without a SQLite file.
pub struct InMemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    changes: RwLock<Vec<ChangeRow>>,
    next_change_id: RwLock<i64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            changes: RwLock::new(Vec::new()),
            next_change_id: RwLock::new(1),
        }
    }

    /// Records a change entry, as the store's (out-of-scope) triggers
    /// would on a real write. Exposed so tests for the realtime change
    /// detector can drive change production directly.
    pub fn record_change(
        &self,
        collection: &str,
        operation: ChangeOperation,
        doc_id: &str,
        changed_fields: Option<Vec<String>>,
    ) -> i64 {
        let mut next_id = self.next_change_id.write();
        let id = *next_id;
        *next_id += 1;

        self.changes.write().push(ChangeRow {
            id,
            collection: collection.to_string(),
            operation,
            doc_id: doc_id.to_string(),
            changed_fields,
            timestamp: chrono::Utc::now(),
            processed: false,
        });

        id
    }

    fn value_matches(value: Option<&Value>, op: &FilterOp) -> bool {
        let as_str = |v: &Value| -> String {
            match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        };
        let lhs = value.map(as_str);

        match (lhs, op) {
            (Some(l), FilterOp::Eq(r)) => &l == r,
            (None, FilterOp::Eq(_)) => false,
            (Some(l), FilterOp::Ne(r)) => &l != r,
            (None, FilterOp::Ne(_)) => true,
            (Some(l), FilterOp::Gt(r)) => l.as_str() > r.as_str(),
            (Some(l), FilterOp::Gte(r)) => l.as_str() >= r.as_str(),
            (Some(l), FilterOp::Lt(r)) => l.as_str() < r.as_str(),
            (Some(l), FilterOp::Lte(r)) => l.as_str() <= r.as_str(),
            (None, _) => false,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn query(&self, q: Query) -> Result<Vec<Row>, AlyxError> {
        let collections = self.collections.read();
        let Some(collection) = collections.get(&q.collection) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<Row> = collection
            .rows
            .iter()
            .filter(|(_, row)| {
                q.filters
                    .iter()
                    .all(|f| Self::value_matches(row.get(&f.field), &f.op))
            })
            .map(|(id, row)| {
                let mut row = row.clone();
                row.insert("id".to_string(), Value::String(id.clone()));
                row
            })
            .collect();

        if let Some(sort_field) = &q.sort_field {
            rows.sort_by(|a, b| {
                let av = a.get(sort_field).map(|v| v.to_string()).unwrap_or_default();
                let bv = b.get(sort_field).map(|v| v.to_string()).unwrap_or_default();
                match q.sort_direction {
                    SortDirection::Ascending => av.cmp(&bv),
                    SortDirection::Descending => bv.cmp(&av),
                }
            });
        }

        let offset = q.offset.unwrap_or(0).max(0) as usize;
        let rows = rows.into_iter().skip(offset);
        let rows: Vec<Row> = match q.limit {
            Some(limit) => rows.take(limit.max(0) as usize).collect(),
            None => rows.collect(),
        };

        Ok(rows)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Row>, AlyxError> {
        let collections = self.collections.read();
        Ok(collections.get(collection).and_then(|c| {
            c.rows.get(id).map(|row| {
                let mut row = row.clone();
                row.insert("id".to_string(), Value::String(id.to_string()));
                row
            })
        }))
    }

    async fn insert(&self, collection: &str, mut row: Row) -> Result<Row, AlyxError> {
        let id = row
            .remove("id")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();
        entry.rows.insert(id.clone(), row.clone());

        row.insert("id".to_string(), Value::String(id));
        Ok(row)
    }

    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<Row, AlyxError> {
        let mut collections = self.collections.write();
        let entry = collections
            .get_mut(collection)
            .ok_or(AlyxError::NotFound)?;
        let existing = entry.rows.get_mut(id).ok_or(AlyxError::NotFound)?;

        for (k, v) in patch {
            existing.insert(k, v);
        }

        let mut result = existing.clone();
        result.insert("id".to_string(), Value::String(id.to_string()));
        Ok(result)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AlyxError> {
        let mut collections = self.collections.write();
        if let Some(entry) = collections.get_mut(collection) {
            entry.rows.remove(id);
        }
        Ok(())
    }

    async fn changes_after(&self, last_seen_id: i64, limit: i64) -> Result<Vec<ChangeRow>, AlyxError> {
        let changes = self.changes.read();
        Ok(changes
            .iter()
            .filter(|c| c.id > last_seen_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, up_to_id: i64) -> Result<(), AlyxError> {
        let mut changes = self.changes.write();
        for change in changes.iter_mut() {
            if change.id <= up_to_id {
                change.processed = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SortDirection;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemoryStore::new();
        let mut row = Row::new();
        row.insert("title".into(), Value::String("hello".into()));
        let inserted = store.insert("posts", row).await.unwrap();
        let id = inserted.get("id").unwrap().as_str().unwrap().to_string();

        let fetched = store.get("posts", &id).await.unwrap().unwrap();
        assert_eq!(fetched.get("title").unwrap(), "hello");
    }

    #[tokio::test]
    async fn get_missing_collection_returns_none() {
        let store = InMemoryStore::new();
        assert!(store.get("nope", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_filters_sorts_and_paginates() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            let mut row = Row::new();
            row.insert("n".into(), Value::Number(i.into()));
            store.insert("items", row).await.unwrap();
        }

        let q = Query::new("items").sort_by("n", SortDirection::Descending).with_limit(2);
        let rows = store.query(q).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("n").unwrap(), 4);
        assert_eq!(rows[1].get("n").unwrap(), 3);
    }

    #[tokio::test]
    async fn update_merges_patch() {
        let store = InMemoryStore::new();
        let mut row = Row::new();
        row.insert("a".into(), Value::String("1".into()));
        let inserted = store.insert("things", row).await.unwrap();
        let id = inserted.get("id").unwrap().as_str().unwrap().to_string();

        let mut patch = Row::new();
        patch.insert("b".into(), Value::String("2".into()));
        let updated = store.update("things", &id, patch).await.unwrap();

        assert_eq!(updated.get("a").unwrap(), "1");
        assert_eq!(updated.get("b").unwrap(), "2");
    }

    #[tokio::test]
    async fn update_missing_row_errors() {
        let store = InMemoryStore::new();
        let err = store.update("things", "nope", Row::new()).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.delete("things", "nope").await.unwrap();
        store.delete("things", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn changes_after_respects_last_seen_and_limit() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store.record_change("items", ChangeOperation::Insert, &i.to_string(), None);
        }

        let page = store.changes_after(5, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].id, 6);
        assert_eq!(page[2].id, 8);
    }

    #[tokio::test]
    async fn mark_processed_flags_up_to_id() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            store.record_change("items", ChangeOperation::Insert, &i.to_string(), None);
        }

        store.mark_processed(2).await.unwrap();
        let changes = store.changes_after(0, 10).await.unwrap();
        assert!(changes[0].processed);
        assert!(changes[1].processed);
        assert!(!changes[2].processed);
    }
}
