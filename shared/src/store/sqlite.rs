//! # SQLite-backed `Store`
//!
//! The reference embedded `Store` implementation: `sqlx` over SQLite in
//! WAL mode, mirroring the pool-construction pattern used across the
//! pack's own sqlite-backed server crates (`SqliteConnectOptions`,
//! `journal_mode(Wal)`, `create_if_missing(true)`).
//!
//! Dynamic collections (anything that isn't one of the fixed `_alyx_*`
//! tables) are stored one table per collection, named
//! `_alyx_collection_{name}`, each with an indexed `id TEXT PRIMARY KEY`
//! column and a `data TEXT` column holding the row as a JSON blob. This
//! keeps the store agnostic to collection shape, since the schema/rules
//! DSL that defines it is out of scope here.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row as _;

use crate::errors::AlyxError;

use super::{ChangeOperation, ChangeRow, FilterOp, Query, Row, SortDirection, Store};

/// A pooled connection to a SQLite-backed embedded store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to (creating if absent) the database at `database_url`
    /// (e.g. `sqlite://./data/alyx.sqlite3`), enables WAL mode, and
    /// ensures the fixed `_alyx_*` tables and their indexes exist.
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AlyxError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AlyxError::InvalidConfig(format!("invalid database url: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), AlyxError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _alyx_users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                role TEXT NOT NULL DEFAULT 'user',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS _alyx_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                refresh_token_hash TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                user_agent TEXT,
                ip_address TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_alyx_sessions_fingerprint
                ON _alyx_sessions(refresh_token_hash);

            CREATE TABLE IF NOT EXISTS _alyx_oauth_accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                provider_user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(provider, provider_user_id)
            );

            CREATE TABLE IF NOT EXISTS _alyx_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                operation TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                changed_fields TEXT,
                timestamp TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_alyx_changes_processed
                ON _alyx_changes(processed, id);

            CREATE TABLE IF NOT EXISTS _alyx_files (
                id TEXT PRIMARY KEY,
                bucket TEXT NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0,
                compression_type TEXT,
                original_size INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}',
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(bucket, path)
            );
            CREATE INDEX IF NOT EXISTS idx_alyx_files_bucket ON _alyx_files(bucket);

            CREATE TABLE IF NOT EXISTS _alyx_uploads (
                id TEXT PRIMARY KEY,
                bucket TEXT NOT NULL,
                filename TEXT NOT NULL,
                size INTEGER NOT NULL,
                offset INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '{}',
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alyx_uploads_expires_at ON _alyx_uploads(expires_at);

            CREATE TABLE IF NOT EXISTS _alyx_scheduler_state (
                schedule_id TEXT PRIMARY KEY,
                last_execution_at TEXT,
                next_execution_at TEXT,
                execution_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AlyxError::Store(e.to_string()))?;

        Ok(())
    }

    /// Maps a collection name to its backing table. `_alyx_`-prefixed
    /// names target a fixed internal table directly; anything else is
    /// namespaced under `_alyx_collection_`. Both branches are
    /// interpolated into raw SQL via `format!` at every call site, so
    /// both are checked against the same ascii-lowercase/digit/underscore
    /// whitelist — the prefix only changes which table is targeted, never
    /// whether it's validated.
    fn table_name(collection: &str) -> Result<String, AlyxError> {
        if !collection
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(AlyxError::CollectionNotFound(collection.to_string()));
        }
        if collection.starts_with("_alyx_") {
            return Ok(collection.to_string());
        }
        Ok(format!("_alyx_collection_{collection}"))
    }

    async fn ensure_collection_table(&self, collection: &str) -> Result<(), AlyxError> {
        let table = Self::table_name(collection)?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, data TEXT NOT NULL)"
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| AlyxError::Store(e.to_string()))?;
        Ok(())
    }

    fn row_from_json(id: &str, data: &str) -> Result<Row, AlyxError> {
        let mut value: Row = serde_json::from_str(data)
            .map_err(|e| AlyxError::Store(format!("corrupt row json: {e}")))?;
        value.insert("id".to_string(), Value::String(id.to_string()));
        Ok(value)
    }

    fn filter_sql(op: &FilterOp) -> (&'static str, &str) {
        match op {
            FilterOp::Eq(v) => ("=", v),
            FilterOp::Ne(v) => ("!=", v),
            FilterOp::Gt(v) => (">", v),
            FilterOp::Gte(v) => (">=", v),
            FilterOp::Lt(v) => ("<", v),
            FilterOp::Lte(v) => ("<=", v),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn query(&self, q: Query) -> Result<Vec<Row>, AlyxError> {
        self.ensure_collection_table(&q.collection).await?;
        let table = Self::table_name(&q.collection)?;

        let mut sql = format!("SELECT id, data FROM {table}");
        let mut binds: Vec<String> = Vec::new();

        if !q.filters.is_empty() {
            let clauses: Vec<String> = q
                .filters
                .iter()
                .map(|f| {
                    let (op_sql, value) = Self::filter_sql(&f.op);
                    binds.push(value.to_string());
                    format!("json_extract(data, '$.{}') {} ?", f.field, op_sql)
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if let Some(sort_field) = &q.sort_field {
            let dir = match q.sort_direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            if sort_field == "id" {
                sql.push_str(&format!(" ORDER BY id {dir}"));
            } else {
                sql.push_str(&format!(" ORDER BY json_extract(data, '$.{sort_field}') {dir}"));
            }
        }

        if let Some(limit) = q.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = q.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let mut query = sqlx::query(&sql);
        for b in &binds {
            query = query.bind(b);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let id: String = r.try_get("id").map_err(|e| AlyxError::Store(e.to_string()))?;
                let data: String = r.try_get("data").map_err(|e| AlyxError::Store(e.to_string()))?;
                Self::row_from_json(&id, &data)
            })
            .collect()
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Row>, AlyxError> {
        self.ensure_collection_table(collection).await?;
        let table = Self::table_name(collection)?;

        let row = sqlx::query(&format!("SELECT data FROM {table} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;

        match row {
            Some(r) => {
                let data: String = r.try_get("data").map_err(|e| AlyxError::Store(e.to_string()))?;
                Ok(Some(Self::row_from_json(id, &data)?))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, collection: &str, mut row: Row) -> Result<Row, AlyxError> {
        self.ensure_collection_table(collection).await?;
        let table = Self::table_name(collection)?;

        let id = row
            .remove("id")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let data = serde_json::to_string(&row)
            .map_err(|e| AlyxError::Store(format!("failed to serialize row: {e}")))?;

        sqlx::query(&format!("INSERT INTO {table} (id, data) VALUES (?, ?)"))
            .bind(&id)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;

        Self::row_from_json(&id, &data)
    }

    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<Row, AlyxError> {
        self.ensure_collection_table(collection).await?;
        let table = Self::table_name(collection)?;

        let existing = self
            .get(collection, id)
            .await?
            .ok_or(AlyxError::NotFound)?;

        let mut merged = existing;
        merged.remove("id");
        for (k, v) in patch {
            merged.insert(k, v);
        }

        let data = serde_json::to_string(&merged)
            .map_err(|e| AlyxError::Store(format!("failed to serialize row: {e}")))?;

        sqlx::query(&format!("UPDATE {table} SET data = ? WHERE id = ?"))
            .bind(&data)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;

        Self::row_from_json(id, &data)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), AlyxError> {
        self.ensure_collection_table(collection).await?;
        let table = Self::table_name(collection)?;

        sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;

        Ok(())
    }

    async fn changes_after(&self, last_seen_id: i64, limit: i64) -> Result<Vec<ChangeRow>, AlyxError> {
        let rows = sqlx::query(
            "SELECT id, collection, operation, doc_id, changed_fields, timestamp, processed
             FROM _alyx_changes WHERE id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(last_seen_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AlyxError::Store(e.to_string()))?;

        rows.into_iter()
            .map(|r| {
                let op: String = r.try_get("operation").map_err(|e| AlyxError::Store(e.to_string()))?;
                let operation = match op.as_str() {
                    "INSERT" => ChangeOperation::Insert,
                    "UPDATE" => ChangeOperation::Update,
                    "DELETE" => ChangeOperation::Delete,
                    other => return Err(AlyxError::Store(format!("unknown change operation: {other}"))),
                };
                let changed_fields: Option<String> =
                    r.try_get("changed_fields").map_err(|e| AlyxError::Store(e.to_string()))?;
                let timestamp: String = r.try_get("timestamp").map_err(|e| AlyxError::Store(e.to_string()))?;

                Ok(ChangeRow {
                    id: r.try_get("id").map_err(|e| AlyxError::Store(e.to_string()))?,
                    collection: r.try_get("collection").map_err(|e| AlyxError::Store(e.to_string()))?,
                    operation,
                    doc_id: r.try_get("doc_id").map_err(|e| AlyxError::Store(e.to_string()))?,
                    changed_fields: changed_fields
                        .map(|s| serde_json::from_str(&s))
                        .transpose()
                        .map_err(|e| AlyxError::Store(format!("corrupt changed_fields: {e}")))?,
                    timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                        .map_err(|e| AlyxError::Store(format!("corrupt timestamp: {e}")))?
                        .with_timezone(&chrono::Utc),
                    processed: r.try_get::<i64, _>("processed")
                        .map_err(|e| AlyxError::Store(e.to_string()))?
                        != 0,
                })
            })
            .collect()
    }

    async fn mark_processed(&self, up_to_id: i64) -> Result<(), AlyxError> {
        sqlx::query("UPDATE _alyx_changes SET processed = 1 WHERE id <= ?")
            .bind(up_to_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AlyxError::Store(e.to_string()))?;
        Ok(())
    }
}
