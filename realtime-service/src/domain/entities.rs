//! # Realtime domain entities
//!
//! `Subscription` and `Client` are in-memory only ("not
//! persisted") and are owned entirely by the [`crate::broker::Broker`].
//! `Change` is the shared `ChangeRow` from `shared::store` re-exported
//! under this crate's own vocabulary.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use shared::rules::AuthContext;

pub use shared::store::{ChangeOperation, ChangeRow as Change};

pub type SubscriptionId = String;
pub type ClientId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Paused,
    Canceled,
}

/// One comparison applied to a single field. Several may apply to the
/// same field; all must hold (per-field conjunction).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// SQL-style `%`-wildcard glob match; operand is always a string.
    Like(String),
    In(Vec<Value>),
    Contains(Value),
}

pub type SubscriptionFilter = HashMap<String, Vec<FilterOp>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Server-side representation of a client's interest in a collection
/// Not persisted; destroyed on unsubscribe/disconnect.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub client_id: ClientId,
    pub collection: String,
    pub filter: SubscriptionFilter,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub expand: Vec<String>,
    pub state: SubscriptionState,
    pub auth_context: AuthContext,
    /// Primary keys currently believed to match `filter`, used to compute
    /// deltas against the next change (see the delta table in `broker`).
    pub doc_ids: HashSet<String>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        client_id: ClientId,
        collection: String,
        filter: SubscriptionFilter,
        sort: Option<SortSpec>,
        limit: Option<usize>,
        expand: Vec<String>,
        auth_context: AuthContext,
    ) -> Self {
        Self {
            id,
            client_id,
            collection,
            filter,
            sort,
            limit,
            expand,
            state: SubscriptionState::Active,
            auth_context,
            doc_ids: HashSet::new(),
        }
    }
}

/// Changes within a single `delta` message, grouped by kind: inserts,
/// updates, and deletes each collected into their own list.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DeltaChanges {
    pub inserts: Vec<serde_json::Map<String, Value>>,
    pub updates: Vec<serde_json::Map<String, Value>>,
    pub deletes: Vec<String>,
}

impl DeltaChanges {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Messages the broker sends a client over its duplex connection
/// (the realtime duplex protocol).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Connected { client_id: ClientId },
    Snapshot { subscription_id: SubscriptionId, docs: Vec<serde_json::Map<String, Value>>, total: usize },
    Delta { subscription_id: SubscriptionId, changes: DeltaChanges },
    Pong,
    Error { code: String, message: String },
}
