//! # Subscription index
//!
//! `collection -> (subscription_id -> Subscription)`.
//! Concurrent reads are allowed; inserts/removes take the writer lock
//! just long enough to mutate the two-level map, maintaining the
//! inverse so an emptied per-collection map is deleted (bounding
//! memory).

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::{ClientId, Subscription, SubscriptionId};

#[derive(Default)]
pub struct SubscriptionIndex {
    inner: RwLock<HashMap<String, HashMap<SubscriptionId, Subscription>>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) {
        let mut inner = self.inner.write();
        inner.entry(subscription.collection.clone()).or_default().insert(subscription.id.clone(), subscription);
    }

    /// Removes a subscription by id, given the collection it lives
    /// under. Deletes the per-collection map once it is empty.
    pub fn remove(&self, collection: &str, id: &str) -> Option<Subscription> {
        let mut inner = self.inner.write();
        let Some(by_id) = inner.get_mut(collection) else { return None };
        let removed = by_id.remove(id);
        if by_id.is_empty() {
            inner.remove(collection);
        }
        removed
    }

    /// Removes every subscription belonging to `client_id`, across all
    /// collections. Used on disconnect.
    pub fn remove_client(&self, client_id: &ClientId) -> Vec<Subscription> {
        let mut inner = self.inner.write();
        let mut removed = Vec::new();
        inner.retain(|_, by_id| {
            let to_remove: Vec<SubscriptionId> =
                by_id.values().filter(|s| &s.client_id == client_id).map(|s| s.id.clone()).collect();
            for id in to_remove {
                if let Some(sub) = by_id.remove(&id) {
                    removed.push(sub);
                }
            }
            !by_id.is_empty()
        });
        removed
    }

    /// Candidate subscription ids for a collection: looked up by
    /// `change.collection` only, coarse-grained filtering happens next.
    pub fn candidate_ids(&self, collection: &str) -> Vec<SubscriptionId> {
        self.inner.read().get(collection).map(|by_id| by_id.keys().cloned().collect()).unwrap_or_default()
    }

    /// Runs `f` against the subscription at `(collection, id)` under the
    /// writer lock, letting the broadcast loop mutate `doc_ids` in
    /// place. No-op if the subscription no longer exists (it may have
    /// been removed concurrently by an unsubscribe).
    pub fn with_subscription_mut<R>(&self, collection: &str, id: &str, f: impl FnOnce(&mut Subscription) -> R) -> Option<R> {
        let mut inner = self.inner.write();
        inner.get_mut(collection)?.get_mut(id).map(f)
    }

    pub fn collection_count(&self) -> usize {
        self.inner.read().len()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::rules::AuthContext;

    fn sub(id: &str, collection: &str, client_id: &str) -> Subscription {
        Subscription::new(id.to_string(), client_id.to_string(), collection.to_string(), Default::default(), None, None, vec![], AuthContext { user_id: None, role: None })
    }

    #[test]
    fn insert_then_candidate_ids() {
        let index = SubscriptionIndex::new();
        index.insert(sub("s1", "posts", "c1"));
        assert_eq!(index.candidate_ids("posts"), vec!["s1".to_string()]);
        assert!(index.candidate_ids("comments").is_empty());
    }

    #[test]
    fn remove_deletes_empty_collection_map() {
        let index = SubscriptionIndex::new();
        index.insert(sub("s1", "posts", "c1"));
        assert_eq!(index.collection_count(), 1);

        index.remove("posts", "s1");
        assert_eq!(index.collection_count(), 0);
    }

    #[test]
    fn remove_client_clears_across_collections() {
        let index = SubscriptionIndex::new();
        index.insert(sub("s1", "posts", "c1"));
        index.insert(sub("s2", "comments", "c1"));
        index.insert(sub("s3", "posts", "c2"));

        let removed = index.remove_client(&"c1".to_string());
        assert_eq!(removed.len(), 2);
        assert_eq!(index.candidate_ids("posts"), vec!["s3".to_string()]);
        assert!(index.candidate_ids("comments").is_empty());
    }

    #[test]
    fn with_subscription_mut_updates_doc_ids() {
        let index = SubscriptionIndex::new();
        index.insert(sub("s1", "posts", "c1"));

        index.with_subscription_mut("posts", "s1", |s| {
            s.doc_ids.insert("doc-1".to_string());
        });

        index.with_subscription_mut("posts", "s1", |s| {
            assert!(s.doc_ids.contains("doc-1"));
        });
    }
}
