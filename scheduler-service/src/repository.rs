//! # Schedule repository
//!
//! Data access for `Schedule`, expressed over `shared::store::Store` the
//! same way `auth-service`'s `UserRepository` is: a typed entity mapped
//! to/from the store's generic `Row` via `serde_json`, with no SQL living
//! in this crate.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use shared::errors::{AlyxError, AlyxResult};
use shared::store::{FilterOp, Query, Row, SortDirection, Store};

use crate::domain::Schedule;

const SCHEDULES_TABLE: &str = "_alyx_scheduler_state";

fn row_to<T: serde::de::DeserializeOwned>(row: Row) -> AlyxResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| AlyxError::Internal(format!("row decode failed: {e}")))
}

fn to_row<T: serde::Serialize>(value: &T) -> AlyxResult<Row> {
    match serde_json::to_value(value).map_err(|e| AlyxError::Internal(format!("row encode failed: {e}")))? {
        Value::Object(map) => Ok(map),
        _ => Err(AlyxError::Internal("expected an object".into())),
    }
}

/// Matches chrono's own `Serialize` impl for `DateTime<Utc>` (RFC3339,
/// `Z` suffix, automatic sub-second precision) so a filter value string-
/// compares correctly against a `next_run` field that went through the
/// same serialization on the way into the row.
fn iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Clone)]
pub struct ScheduleRepository {
    store: Arc<dyn Store>,
}

impl ScheduleRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, schedule: Schedule) -> AlyxResult<Schedule> {
        let row = to_row(&schedule)?;
        let stored = self.store.insert(SCHEDULES_TABLE, row).await?;
        row_to(stored)
    }

    pub async fn find_by_id(&self, id: &str) -> AlyxResult<Option<Schedule>> {
        match self.store.get(SCHEDULES_TABLE, id).await? {
            Some(row) => Ok(Some(row_to(row)?)),
            None => Ok(None),
        }
    }

    pub async fn update(&self, id: &str, patch: Row) -> AlyxResult<Schedule> {
        let stored = self.store.update(SCHEDULES_TABLE, id, patch).await?;
        row_to(stored)
    }

    pub async fn delete(&self, id: &str) -> AlyxResult<()> {
        self.store.delete(SCHEDULES_TABLE, id).await
    }

    /// Enabled schedules whose
    /// `next_run` has arrived, ordered by `next_run` ascending.
    pub async fn get_due(&self, now: DateTime<Utc>, limit: i64) -> AlyxResult<Vec<Schedule>> {
        let query = Query::new(SCHEDULES_TABLE)
            .filter("enabled", FilterOp::Eq("true".to_string()))
            .filter("next_run", FilterOp::Lte(iso(now)))
            .sort_by("next_run", SortDirection::Ascending)
            .with_limit(limit);
        let rows = self.store.query(query).await?;
        rows.into_iter().map(row_to::<Schedule>).collect()
    }

    /// All schedules with a stale `next_run` (`next_run < now`), for
    /// startup recovery. Not paginated — recovery runs once at startup.
    pub async fn find_stale(&self, now: DateTime<Utc>) -> AlyxResult<Vec<Schedule>> {
        let query =
            Query::new(SCHEDULES_TABLE).filter("next_run", FilterOp::Lt(iso(now))).sort_by("next_run", SortDirection::Ascending);
        let rows = self.store.query(query).await?;
        rows.into_iter().map(row_to::<Schedule>).collect()
    }
}
