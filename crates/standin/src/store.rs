//! In-memory interaction registry.
//!
//! The store is the only resource mutated concurrently by the controlling
//! test process (add/remove) and the serving path (read + counter
//! increment). Mutations happen under a single write lock and dispatches
//! iterate an `Arc` snapshot, so a dispatch never observes a torn or
//! partially registered batch.

use crate::error::Result;
use crate::interaction::{Interaction, InteractionSpec};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Registry of interactions in insertion order.
#[derive(Debug, Default)]
pub struct InteractionStore {
    interactions: RwLock<Vec<Arc<Interaction>>>,
}

impl InteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single interaction, returning its id.
    ///
    /// The spec is validated eagerly; malformed interactions are rejected
    /// with a descriptive error and never stored.
    pub fn add(&self, spec: InteractionSpec) -> Result<String> {
        let interaction = Arc::new(Interaction::from_spec(spec)?);
        let id = interaction.id.clone();
        debug!(id = %id, method = %interaction.request.method, path = %interaction.request.path, "registered interaction");
        self.interactions.write().push(interaction);
        Ok(id)
    }

    /// Register a batch of interactions, returning ids in array order.
    ///
    /// All specs are validated before any is stored, and the batch is pushed
    /// under one write lock: insertion order equals array index order and no
    /// dispatch sees a partial batch.
    pub fn add_many(&self, specs: Vec<InteractionSpec>) -> Result<Vec<String>> {
        let mut batch = Vec::with_capacity(specs.len());
        for spec in specs {
            batch.push(Arc::new(Interaction::from_spec(spec)?));
        }
        let ids: Vec<String> = batch.iter().map(|i| i.id.clone()).collect();
        self.interactions.write().extend(batch);
        Ok(ids)
    }

    /// Remove an interaction by id. Unknown ids are a no-op.
    pub fn remove(&self, id: &str) -> bool {
        let mut interactions = self.interactions.write();
        let before = interactions.len();
        interactions.retain(|i| i.id != id);
        let removed = interactions.len() != before;
        if removed {
            debug!(id = %id, "removed interaction");
        }
        removed
    }

    /// Sweep non-persistent interactions; persistent fixtures survive.
    pub fn clear(&self) {
        self.interactions.write().retain(|i| i.persistent);
    }

    /// Remove every interaction, persistent ones included.
    pub fn clear_all(&self) {
        self.interactions.write().clear();
    }

    /// Look up an interaction by id.
    pub fn get(&self, id: &str) -> Option<Arc<Interaction>> {
        self.interactions.read().iter().find(|i| i.id == id).cloned()
    }

    /// Consistent snapshot of all interactions in insertion order. Callers
    /// that need most-recently-added-first iterate it in reverse.
    pub fn snapshot(&self) -> Vec<Arc<Interaction>> {
        self.interactions.read().clone()
    }

    /// Interactions whose expected call count has not been met.
    pub fn unsatisfied(&self) -> Vec<Arc<Interaction>> {
        self.interactions
            .read()
            .iter()
            .filter(|i| !i.satisfied())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.interactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(path: &str) -> InteractionSpec {
        serde_json::from_value(json!({ "request": { "path": path } })).unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let store = InteractionStore::new();
        let id = store.add(spec("/api/projects/1")).unwrap();
        let interaction = store.get(&id).unwrap();
        assert_eq!(interaction.request.path, "/api/projects/1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_rejects_malformed_spec() {
        let store = InteractionStore::new();
        let err = store.add(InteractionSpec::default()).unwrap_err();
        assert_eq!(err.to_string(), "`request` is required");
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_many_preserves_array_order() {
        let store = InteractionStore::new();
        let ids = store
            .add_many(vec![spec("/a"), spec("/b"), spec("/c")])
            .unwrap();
        assert_eq!(ids.len(), 3);
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].request.path, "/a");
        assert_eq!(snapshot[1].request.path, "/b");
        assert_eq!(snapshot[2].request.path, "/c");
    }

    #[test]
    fn test_add_many_is_all_or_nothing() {
        let store = InteractionStore::new();
        let result = store.add_many(vec![spec("/a"), InteractionSpec::default()]);
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_by_id() {
        let store = InteractionStore::new();
        let id = store.add(spec("/a")).unwrap();
        assert!(store.remove(&id));
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
        // Unknown id is a no-op.
        assert!(!store.remove("missing"));
    }

    #[test]
    fn test_clear_spares_persistent() {
        let store = InteractionStore::new();
        store.add(spec("/ephemeral")).unwrap();
        let persistent: InteractionSpec = serde_json::from_value(
            json!({ "request": { "path": "/fixture" }, "persistent": true }),
        )
        .unwrap();
        let fixture_id = store.add(persistent).unwrap();

        store.clear();
        assert_eq!(store.len(), 1);
        assert!(store.get(&fixture_id).is_some());

        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn test_unsatisfied_reports_unexercised() {
        let store = InteractionStore::new();
        let id = store.add(spec("/a")).unwrap();
        let any: InteractionSpec = serde_json::from_value(
            json!({ "request": { "path": "/b" }, "expectedCalls": 0 }),
        )
        .unwrap();
        store.add(any).unwrap();

        let unsatisfied = store.unsatisfied();
        assert_eq!(unsatisfied.len(), 1);
        assert_eq!(unsatisfied[0].id, id);
    }
}
