//! Concurrent entity registry with one lock per entity.
//!
//! Entities are created lazily on first reference and never removed by
//! cycles. Every entity sits behind its own `tokio::sync::Mutex`, so two
//! cycles touching the same entity are serialized while cycles on different
//! entities run independently.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::types::{EntityUpdate, TrackedEntity};
use crate::scoring::{Scorer, Signals};

/// Shared handle to one entity's state.
pub type EntityHandle = Arc<Mutex<TrackedEntity>>;

/// Default number of mutation records kept per entity.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Registry of tracked entities keyed by id.
#[derive(Debug)]
pub struct EntityRegistry {
    entities: DashMap<String, EntityHandle>,
    history_limit: usize,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl EntityRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            entities: DashMap::new(),
            history_limit,
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Return the entity with `id`, inserting a default-initialized one if
    /// it does not exist yet.
    pub fn get_or_create(&self, id: &str) -> EntityHandle {
        if let Some(handle) = self.entities.get(id) {
            return Arc::clone(handle.value());
        }
        let handle = self
            .entities
            .entry(id.to_string())
            .or_insert_with(|| {
                log::debug!("Tracking new entity '{}'", id);
                Arc::new(Mutex::new(TrackedEntity::new(id)))
            });
        Arc::clone(handle.value())
    }

    /// Look up an entity without creating it.
    pub fn get(&self, id: &str) -> Option<EntityHandle> {
        self.entities.get(id).map(|h| Arc::clone(h.value()))
    }

    /// Replace (or add) an entity wholesale. Used when loading from storage.
    pub fn insert(&self, entity: TrackedEntity) -> EntityHandle {
        let id = entity.id.clone();
        let handle = Arc::new(Mutex::new(entity));
        self.entities.insert(id, Arc::clone(&handle));
        handle
    }

    /// Run `scorer` against the entity's current state and merge the partial
    /// update it returns. The entity is created if missing.
    ///
    /// No validation beyond score clamping is performed on the update.
    pub async fn apply_scorer<S>(&self, id: &str, scorer: &S, aux: &Signals) -> TrackedEntity
    where
        S: Scorer + ?Sized,
    {
        let handle = self.get_or_create(id);
        let mut entity = handle.lock().await;
        let update = scorer.score(&entity, aux);
        update.apply_to(&mut entity, self.history_limit);
        entity.clone()
    }

    /// Merge an already computed update into the entity.
    pub async fn apply_update(&self, id: &str, update: EntityUpdate) -> TrackedEntity {
        let handle = self.get_or_create(id);
        let mut entity = handle.lock().await;
        update.apply_to(&mut entity, self.history_limit);
        entity.clone()
    }

    /// Record observed performance metrics for an entity. Non-finite values
    /// are dropped.
    pub async fn record_metrics(&self, id: &str, metrics: BTreeMap<String, f64>) -> TrackedEntity {
        self.apply_update(
            id,
            EntityUpdate {
                metrics,
                ..Default::default()
            },
        )
        .await
    }

    /// Clone of the entity's current state.
    pub async fn snapshot(&self, id: &str) -> Option<TrackedEntity> {
        let handle = self.get(id)?;
        let entity = handle.lock().await;
        Some(entity.clone())
    }

    /// Clone of every entity, ordered by id.
    pub async fn snapshot_all(&self) -> Vec<TrackedEntity> {
        let handles: Vec<EntityHandle> = self
            .entities
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.lock().await.clone());
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// All tracked ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = EntityRegistry::default();
        let first = registry.get_or_create("unseen");
        let second = registry.get_or_create("unseen");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.lock().await.id, "unseen");
    }

    #[tokio::test]
    async fn test_apply_scorer_merges_partial_update() {
        let registry = EntityRegistry::default();
        {
            let handle = registry.get_or_create("a");
            let mut entity = handle.lock().await;
            entity.generation = 4;
            entity.stagnation = 0.3;
            entity.traits.insert("focus".into(), 0.6);
        }
        let before = registry.snapshot("a").await.unwrap();

        let after = registry
            .apply_scorer(
                "a",
                &|_: &TrackedEntity, _: &Signals| EntityUpdate::default().pressure(0.5),
                &Signals::default(),
            )
            .await;

        assert_eq!(after.pressure, 0.5);
        assert_eq!(after.generation, before.generation);
        assert_eq!(after.stagnation, before.stagnation);
        assert_eq!(after.fitness, before.fitness);
        assert_eq!(after.traits, before.traits);
        assert_eq!(after.history, before.history);
        assert_eq!(after.last_evolution, before.last_evolution);
    }

    #[tokio::test]
    async fn test_apply_scorer_clamps() {
        let registry = EntityRegistry::default();
        let high = registry
            .apply_scorer(
                "a",
                &|_: &TrackedEntity, _: &Signals| EntityUpdate::default().pressure(1.8),
                &Signals::default(),
            )
            .await;
        assert_eq!(high.pressure, 1.0);

        let low = registry
            .apply_scorer(
                "a",
                &|_: &TrackedEntity, _: &Signals| EntityUpdate::default().pressure(-0.4),
                &Signals::default(),
            )
            .await;
        assert_eq!(low.pressure, 0.0);
    }

    #[tokio::test]
    async fn test_apply_scorer_creates_missing_entity() {
        let registry = EntityRegistry::default();
        registry
            .apply_scorer(
                "new",
                &|_: &TrackedEntity, _: &Signals| EntityUpdate::default(),
                &Signals::default(),
            )
            .await;
        assert!(registry.get("new").is_some());
    }

    #[tokio::test]
    async fn test_record_metrics_overwrites_per_key() {
        let registry = EntityRegistry::default();
        let mut first = BTreeMap::new();
        first.insert("success_rate".to_string(), 0.4);
        first.insert("estimation_accuracy".to_string(), 0.7);
        registry.record_metrics("a", first).await;

        let mut second = BTreeMap::new();
        second.insert("success_rate".to_string(), 0.9);
        let entity = registry.record_metrics("a", second).await;

        assert_eq!(entity.metrics["success_rate"], 0.9);
        assert_eq!(entity.metrics["estimation_accuracy"], 0.7);
    }

    #[tokio::test]
    async fn test_insert_replaces_state() {
        let registry = EntityRegistry::default();
        registry.get_or_create("x");
        let mut loaded = TrackedEntity::new("x");
        loaded.pressure = 0.42;
        registry.insert(loaded);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot("x").await.unwrap().pressure, 0.42);
    }

    #[tokio::test]
    async fn test_ids_sorted() {
        let registry = EntityRegistry::default();
        registry.get_or_create("b");
        registry.get_or_create("a");
        registry.get_or_create("c");
        assert_eq!(registry.ids(), vec!["a", "b", "c"]);
        assert_eq!(registry.snapshot_all().await.len(), 3);
    }
}
