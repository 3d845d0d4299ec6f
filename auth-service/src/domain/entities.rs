//! # Authentication Domain Entities
//!
//! Persistent and transient shapes for the auth service. `User`,
//! `Session`, and `OAuthAccount` are persisted through `shared::store::Store`
//! (the
//! store is a generic collaborator, so these entities carry no `FromRow`
//! coupling). `Claims` and `RevocationEntry` never touch the store at all.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered account. `role` is constrained to exactly two values by
/// construction (`Role::User`/`Role::Admin`), never validated after the
/// fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Always trimmed and lowercased before storage.
    pub email: String,
    pub verified: bool,
    pub role: Role,
    /// Argon2id PHC string. `None` for an OAuth-only account that has
    /// never set a password.
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// A live refresh-token session. `refresh_token_hash` is the fingerprint
/// produced by [`crate::token::fingerprint`], never the token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// A federated identity linked to a user. `(provider, provider_user_id)`
/// is unique; [`crate::repository::user_repository::UserRepository::create_oauth_account`]
/// enforces this itself, under a lock, for every [`shared::store::Store`]
/// backend — it does not rely on a schema-level constraint that only
/// `SqliteStore` happens to carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAccount {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub provider_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Decoded token claims. Transient: never written to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub verified: bool,
    pub role: Role,
    pub issuer: String,
    pub audience: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One entry in the revocation set: a token fingerprint mapped to the
/// natural expiry past which the sweeper may forget it.
#[derive(Debug, Clone)]
pub struct RevocationEntry {
    pub token_fingerprint: String,
    pub natural_expiry: DateTime<Utc>,
}

/// The pair of tokens returned by every operation that establishes or
/// rotates a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}
