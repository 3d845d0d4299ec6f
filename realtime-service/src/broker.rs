//! # Broker
//!
//! Composes the subscription index, the change detector's output channel,
//! the client registry, and the rules evaluator into the subscribe/
//! broadcast/stop flows. The broadcast loop processes one
//! `Change` at a time — iteration over a change's candidate subscriptions
//! is therefore naturally single-threaded per subscription, which is what
//! lets `doc_ids` be mutated in place without a second lock layer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use shared::errors::{AlyxError, AlyxResult};
use shared::lifecycle::BackgroundWorker;
use shared::rules::{AuthContext, RuleOp, RuleResource, RulesEvaluator};
use shared::store::{ChangeOperation, ChangeRow, Query, Row, SortDirection as StoreSortDirection, Store};
use tokio::sync::mpsc;
use tracing::warn;

use crate::detector::ChangeDetector;
use crate::domain::{
    ClientId, DeltaChanges, OutboundMessage, SortDirection, SortSpec, Subscription, SubscriptionFilter, SubscriptionId,
};
use crate::filter::matches_row;
use crate::index::SubscriptionIndex;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Knows which collections exist in the schema. The schema/rules DSL
/// itself is out of scope for this workspace; callers plug in whatever
/// enumerates their collections.
pub trait CollectionCatalog: Send + Sync {
    fn exists(&self, collection: &str) -> bool;
}

/// A catalog that admits every collection name. Useful in tests and for
/// deployments that haven't wired up schema validation yet.
pub struct AllowAllCollections;

impl CollectionCatalog for AllowAllCollections {
    fn exists(&self, _collection: &str) -> bool {
        true
    }
}

/// A client's duplex connection. Implementations wrap whatever transport
/// actually carries `OutboundMessage` to the client (websocket, SSE, ...).
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> AlyxResult<()>;

    /// Called once, when the broker drops the connection (persistent send
    /// failure, or broker shutdown). Default no-op.
    async fn close(&self) {}
}

struct ClientHandle {
    connection: Arc<dyn Connection>,
    subscription_count: AtomicUsize,
}

#[derive(Default)]
struct Clients {
    inner: RwLock<HashMap<ClientId, Arc<ClientHandle>>>,
}

impl Clients {
    fn insert(&self, client_id: ClientId, connection: Arc<dyn Connection>) {
        self.inner
            .write()
            .insert(client_id, Arc::new(ClientHandle { connection, subscription_count: AtomicUsize::new(0) }));
    }

    fn get(&self, client_id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.inner.read().get(client_id).cloned()
    }

    fn remove(&self, client_id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.inner.write().remove(client_id)
    }

    /// Stop semantics: take every client out of the map at once so no new
    /// lookup can observe them, then the caller closes each connection.
    fn snapshot_and_clear(&self) -> Vec<Arc<ClientHandle>> {
        let mut inner = self.inner.write();
        let all = inner.values().cloned().collect();
        inner.clear();
        all
    }
}

/// The result of admitting an initial subscribe query.
pub struct Snapshot {
    pub docs: Vec<Row>,
    pub total: usize,
}

/// Pure decision table for the delta computation. Takes no I/O
/// so every row of the table can be asserted directly in a unit test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaAction {
    None,
    Insert,
    Update,
    Delete,
}

pub fn compute_delta(op: ChangeOperation, retrievable: bool, was_in_set: bool, matches: bool) -> DeltaAction {
    match op {
        ChangeOperation::Insert => {
            if retrievable && !was_in_set && matches {
                DeltaAction::Insert
            } else {
                DeltaAction::None
            }
        }
        ChangeOperation::Update => {
            if !retrievable {
                if was_in_set {
                    DeltaAction::Delete
                } else {
                    DeltaAction::None
                }
            } else if was_in_set && matches {
                DeltaAction::Update
            } else if !was_in_set && matches {
                DeltaAction::Insert
            } else if was_in_set {
                DeltaAction::Delete
            } else {
                DeltaAction::None
            }
        }
        ChangeOperation::Delete => {
            if was_in_set {
                DeltaAction::Delete
            } else {
                DeltaAction::None
            }
        }
    }
}

fn to_store_sort(sort: &SortSpec) -> (String, StoreSortDirection) {
    let direction = match sort.direction {
        SortDirection::Ascending => StoreSortDirection::Ascending,
        SortDirection::Descending => StoreSortDirection::Descending,
    };
    (sort.field.clone(), direction)
}

fn doc_id_of(row: &Row) -> Option<String> {
    row.get("id").and_then(|v| v.as_str()).map(str::to_string)
}

pub struct Broker {
    store: Arc<dyn Store>,
    rules: Arc<dyn RulesEvaluator>,
    catalog: Arc<dyn CollectionCatalog>,
    index: Arc<SubscriptionIndex>,
    clients: Arc<Clients>,
    max_subscriptions_per_client: usize,
    send_timeout: Duration,
    detector: ChangeDetector,
    broadcast_worker: Option<BackgroundWorker>,
    stopped: Arc<AtomicBool>,
}

impl Broker {
    pub fn new(
        store: Arc<dyn Store>,
        rules: Arc<dyn RulesEvaluator>,
        catalog: Arc<dyn CollectionCatalog>,
        max_subscriptions_per_client: usize,
    ) -> Self {
        Self {
            store,
            rules,
            catalog,
            index: Arc::new(SubscriptionIndex::new()),
            clients: Arc::new(Clients::default()),
            max_subscriptions_per_client,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            detector: ChangeDetector::new(),
            broadcast_worker: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Starts the change detector and the broadcast loop that consumes it.
    pub fn start(&mut self, poll_interval: Duration) {
        let (tx, rx) = mpsc::channel(1024);
        self.detector.start(self.store.clone(), tx, poll_interval);

        let store = self.store.clone();
        let rules = self.rules.clone();
        let index = self.index.clone();
        let clients = self.clients.clone();
        let send_timeout = self.send_timeout;

        self.broadcast_worker = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut rx = rx;
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    change = rx.recv() => {
                        match change {
                            Some(change) => broadcast_change(&store, &rules, &index, &clients, send_timeout, change).await,
                            None => break,
                        }
                    }
                }
            }
        }));
    }

    pub fn connect(&self, client_id: ClientId, connection: Arc<dyn Connection>) {
        self.clients.insert(client_id, connection);
    }

    pub fn disconnect(&self, client_id: &ClientId) {
        self.clients.remove(client_id);
        self.index.remove_client(client_id);
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn subscribe(
        &self,
        client_id: ClientId,
        subscription_id: SubscriptionId,
        collection: String,
        filter: SubscriptionFilter,
        sort: Option<SortSpec>,
        limit: Option<usize>,
        expand: Vec<String>,
        auth_context: AuthContext,
    ) -> AlyxResult<Snapshot> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AlyxError::Internal("broker is stopped".into()));
        }
        if !self.catalog.exists(&collection) {
            return Err(AlyxError::CollectionNotFound(collection));
        }
        let client = self.clients.get(&client_id).ok_or_else(|| AlyxError::Internal("unknown client".into()))?;
        if client.subscription_count.load(Ordering::SeqCst) >= self.max_subscriptions_per_client {
            return Err(AlyxError::SubscriptionLimitReached);
        }
        client.subscription_count.fetch_add(1, Ordering::SeqCst);

        let subscription = Subscription::new(
            subscription_id.clone(),
            client_id,
            collection.clone(),
            filter.clone(),
            sort.clone(),
            limit,
            expand,
            auth_context.clone(),
        );
        self.index.insert(subscription);

        let mut query = Query::new(collection.clone());
        if let Some(sort) = &sort {
            let (field, direction) = to_store_sort(sort);
            query = query.sort_by(field, direction);
        }

        match self.store.query(query).await {
            Ok(rows) => {
                let mut admitted: Vec<(String, Row)> = Vec::new();
                for row in rows {
                    if !matches_row(&row, &filter) {
                        continue;
                    }
                    let Some(doc_id) = doc_id_of(&row) else { continue };
                    let resource = RuleResource { collection: collection.clone(), doc_id: Some(doc_id.clone()) };
                    if self.rules.evaluate(&resource, RuleOp::Read, &auth_context) {
                        admitted.push((doc_id, row));
                    }
                    if let Some(limit) = limit {
                        if admitted.len() >= limit {
                            break;
                        }
                    }
                }

                let doc_ids: HashSet<String> = admitted.iter().map(|(id, _)| id.clone()).collect();
                self.index.with_subscription_mut(&collection, &subscription_id, |s| s.doc_ids = doc_ids);

                let total = admitted.len();
                let docs = admitted.into_iter().map(|(_, row)| row).collect();
                Ok(Snapshot { docs, total })
            }
            Err(err) => {
                self.index.remove(&collection, &subscription_id);
                client.subscription_count.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    pub fn unsubscribe(&self, collection: &str, subscription_id: &str) {
        if let Some(subscription) = self.index.remove(collection, subscription_id) {
            if let Some(client) = self.clients.get(&subscription.client_id) {
                client.subscription_count.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Stops the detector and broadcast loop, drops every connection, and
    /// rejects subsequent subscribe/unsubscribe calls.
    pub async fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);

        self.detector.stop();
        self.detector.join().await;

        if let Some(mut worker) = self.broadcast_worker.take() {
            worker.stop();
            worker.join().await;
        }

        let clients = self.clients.snapshot_and_clear();
        self.index.clear();

        for client in clients {
            client.connection.close().await;
        }
    }
}

async fn broadcast_change(
    store: &Arc<dyn Store>,
    rules: &Arc<dyn RulesEvaluator>,
    index: &Arc<SubscriptionIndex>,
    clients: &Arc<Clients>,
    send_timeout: Duration,
    change: ChangeRow,
) {
    for subscription_id in index.candidate_ids(&change.collection) {
        let Some((client_id, auth_context, filter, was_in_set)) =
            index.with_subscription_mut(&change.collection, &subscription_id, |s| {
                (s.client_id.clone(), s.auth_context.clone(), s.filter.clone(), s.doc_ids.contains(&change.doc_id))
            })
        else {
            continue;
        };

        let Some(client) = clients.get(&client_id) else { continue };

        let retrieved = if change.operation == ChangeOperation::Delete {
            None
        } else {
            store.get(&change.collection, &change.doc_id).await.ok().flatten()
        };

        let matches = match &retrieved {
            Some(row) => {
                let resource = RuleResource { collection: change.collection.clone(), doc_id: Some(change.doc_id.clone()) };
                matches_row(row, &filter) && rules.evaluate(&resource, RuleOp::Read, &auth_context)
            }
            None => false,
        };

        let action = compute_delta(change.operation, retrieved.is_some(), was_in_set, matches);

        let changes = match action {
            DeltaAction::None => continue,
            DeltaAction::Insert => {
                let Some(row) = retrieved.clone() else { continue };
                index.with_subscription_mut(&change.collection, &subscription_id, |s| {
                    s.doc_ids.insert(change.doc_id.clone());
                });
                DeltaChanges { inserts: vec![row], updates: vec![], deletes: vec![] }
            }
            DeltaAction::Update => {
                let Some(row) = retrieved.clone() else { continue };
                DeltaChanges { inserts: vec![], updates: vec![row], deletes: vec![] }
            }
            DeltaAction::Delete => {
                index.with_subscription_mut(&change.collection, &subscription_id, |s| {
                    s.doc_ids.remove(&change.doc_id);
                });
                DeltaChanges { inserts: vec![], updates: vec![], deletes: vec![change.doc_id.clone()] }
            }
        };

        if changes.is_empty() {
            continue;
        }

        let message = OutboundMessage::Delta { subscription_id: subscription_id.clone(), changes };
        match tokio::time::timeout(send_timeout, client.connection.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(error = %err, client_id = %client_id, "dropping client after send error");
                clients.remove(&client_id);
                index.remove_client(&client_id);
            }
            Err(_) => {
                warn!(client_id = %client_id, "dropping client after send timeout");
                clients.remove(&client_id);
                index.remove_client(&client_id);
            }
        }
    }
}
