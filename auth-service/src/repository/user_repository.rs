//! # User repository
//!
//! Data access for `User`, `Session`, and `OAuthAccount`, expressed over
//! [`shared::store::Store`] rather than a concrete pool. Every method maps
//! a typed entity to/from the store's generic JSON `Row` via `serde_json`;
//! no SQL lives here because the store itself owns query execution.

use std::sync::Arc;

use serde_json::Value;
use shared::errors::{AlyxError, AlyxResult};
use shared::store::{FilterOp, Query, Row, SortDirection, Store};
use tokio::sync::Mutex;

use crate::domain::{OAuthAccount, Session, User};

const USERS_TABLE: &str = "_alyx_users";
const SESSIONS_TABLE: &str = "_alyx_sessions";
const OAUTH_ACCOUNTS_TABLE: &str = "_alyx_oauth_accounts";

fn row_to<T: serde::de::DeserializeOwned>(row: Row) -> AlyxResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| AlyxError::Internal(format!("row decode failed: {e}")))
}

fn to_row<T: serde::Serialize>(value: &T) -> AlyxResult<Row> {
    match serde_json::to_value(value).map_err(|e| AlyxError::Internal(format!("row encode failed: {e}")))? {
        Value::Object(map) => Ok(map),
        _ => Err(AlyxError::Internal("expected an object".into())),
    }
}

/// Allow-listed sort fields for `ListUsers`.
pub const USER_SORT_FIELDS: &[&str] = &["id", "email", "verified", "role", "created_at", "updated_at"];

#[derive(Debug, Clone, Default)]
pub struct ListUsersFilter {
    pub search: Option<String>,
    pub role: Option<String>,
}

#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn Store>,
    /// Serializes the check-then-insert in [`Self::create_oauth_account`]
    /// so the `(provider, provider_user_id)` uniqueness check holds
    /// regardless of which `Store` backend is in play — `InMemoryStore`
    /// has no schema to enforce it at all, and `SqliteStore`'s own
    /// `UNIQUE` constraint would otherwise surface as an opaque
    /// `AlyxError::Store` rather than `AccountAlreadyLinked`.
    oauth_link_lock: Arc<Mutex<()>>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, oauth_link_lock: Arc::new(Mutex::new(())) }
    }

    /// Number of users in the store. Used to decide first-user-is-admin
    /// and whether self-service registration is closed.
    pub async fn count_users(&self) -> AlyxResult<usize> {
        let rows = self.store.query(Query::new(USERS_TABLE)).await?;
        Ok(rows.len())
    }

    pub async fn find_by_email(&self, email: &str) -> AlyxResult<Option<User>> {
        let query = Query::new(USERS_TABLE).filter("email", FilterOp::Eq(email.to_string())).with_limit(1);
        let rows = self.store.query(query).await?;
        rows.into_iter().next().map(row_to::<User>).transpose()
    }

    pub async fn find_by_id(&self, id: &str) -> AlyxResult<Option<User>> {
        match self.store.get(USERS_TABLE, id).await? {
            Some(row) => Ok(Some(row_to(row)?)),
            None => Ok(None),
        }
    }

    pub async fn create(&self, user: User) -> AlyxResult<User> {
        let row = to_row(&user)?;
        let stored = self.store.insert(USERS_TABLE, row).await?;
        row_to(stored)
    }

    pub async fn update(&self, id: &str, patch: Row) -> AlyxResult<User> {
        let stored = self.store.update(USERS_TABLE, id, patch).await?;
        row_to(stored)
    }

    pub async fn delete(&self, id: &str) -> AlyxResult<()> {
        self.store.delete(USERS_TABLE, id).await
    }

    /// Paginated, allow-listed listing.
    pub async fn list(
        &self,
        limit: u32,
        offset: u32,
        sort_field: &str,
        descending: bool,
        filter: &ListUsersFilter,
    ) -> AlyxResult<(Vec<User>, usize)> {
        let mut query = Query::new(USERS_TABLE).sort_by(
            sort_field,
            if descending { SortDirection::Descending } else { SortDirection::Ascending },
        );
        if let Some(role) = &filter.role {
            query = query.filter("role", FilterOp::Eq(role.clone()));
        }

        let all = self.store.query(query.clone()).await?;
        let all: AlyxResult<Vec<User>> = all.into_iter().map(row_to::<User>).collect();
        let mut all = all?;

        if let Some(search) = &filter.search {
            let needle = search.to_ascii_lowercase();
            all.retain(|u| u.email.to_ascii_lowercase().contains(&needle));
        }

        let total = all.len();
        let page = all.into_iter().skip(offset as usize).take(limit as usize).collect();
        Ok((page, total))
    }

    pub async fn create_session(&self, session: Session) -> AlyxResult<Session> {
        let row = to_row(&session)?;
        let stored = self.store.insert(SESSIONS_TABLE, row).await?;
        row_to(stored)
    }

    pub async fn find_session_by_fingerprint(&self, fingerprint: &str) -> AlyxResult<Option<Session>> {
        let query = Query::new(SESSIONS_TABLE).filter("refresh_token_hash", FilterOp::Eq(fingerprint.to_string())).with_limit(1);
        let rows = self.store.query(query).await?;
        rows.into_iter().next().map(row_to::<Session>).transpose()
    }

    pub async fn delete_session(&self, id: &str) -> AlyxResult<()> {
        self.store.delete(SESSIONS_TABLE, id).await
    }

    pub async fn find_oauth_account(&self, provider: &str, provider_user_id: &str) -> AlyxResult<Option<OAuthAccount>> {
        let query = Query::new(OAUTH_ACCOUNTS_TABLE)
            .filter("provider", FilterOp::Eq(provider.to_string()))
            .filter("provider_user_id", FilterOp::Eq(provider_user_id.to_string()))
            .with_limit(1);
        let rows = self.store.query(query).await?;
        rows.into_iter().next().map(row_to::<OAuthAccount>).transpose()
    }

    /// Inserts `account`, enforcing `(provider, provider_user_id)`
    /// uniqueness under `oauth_link_lock` so two concurrent linking
    /// attempts for the same federated identity can't both pass a
    /// check-then-insert race. Returns `AccountAlreadyLinked` if the pair
    /// is already linked to a different user, or the existing account if
    /// it's already linked to the same one.
    pub async fn create_oauth_account(&self, account: OAuthAccount) -> AlyxResult<OAuthAccount> {
        let _guard = self.oauth_link_lock.lock().await;

        if let Some(existing) = self.find_oauth_account(&account.provider, &account.provider_user_id).await? {
            if existing.user_id != account.user_id {
                return Err(AlyxError::AccountAlreadyLinked);
            }
            return Ok(existing);
        }

        let row = to_row(&account)?;
        let stored = self.store.insert(OAUTH_ACCOUNTS_TABLE, row).await?;
        row_to(stored)
    }
}
