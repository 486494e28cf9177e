//! In-process entity store.
//!
//! Rows go through the same [`EntityRow`] encoding as the SQL backends, so a
//! round-trip here exercises serialization too. The store can be switched
//! offline to simulate an unreachable database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::row::EntityRow;
use super::{EntityStore, LoadedEntities};
use crate::cycle::CycleRecord;
use crate::entity::TrackedEntity;
use crate::error::StoreError;

#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    rows: Mutex<BTreeMap<String, EntityRow>>,
    cycles: Mutex<Vec<CycleRecord>>,
    offline: AtomicBool,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store a raw row as-is, bypassing entity encoding.
    pub fn insert_row(&self, row: EntityRow) {
        self.rows.lock().insert(row.id.clone(), row);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn upsert_entities(&self, entities: &[TrackedEntity]) -> Result<usize, StoreError> {
        self.check_online()?;
        let encoded = entities
            .iter()
            .map(EntityRow::from_entity)
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = self.rows.lock();
        for row in encoded {
            rows.insert(row.id.clone(), row);
        }
        Ok(entities.len())
    }

    async fn load_entities(&self) -> Result<LoadedEntities, StoreError> {
        self.check_online()?;
        let rows: Vec<EntityRow> = self.rows.lock().values().cloned().collect();
        let mut loaded = LoadedEntities::default();
        for row in rows {
            let id = row.id.clone();
            loaded.push(id, row.into_entity());
        }
        Ok(loaded)
    }

    async fn append_cycle(&self, record: &CycleRecord) -> Result<(), StoreError> {
        self.check_online()?;
        self.cycles.lock().push(record.clone());
        Ok(())
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>, StoreError> {
        self.check_online()?;
        let cycles = self.cycles.lock();
        let mut recent: Vec<CycleRecord> = cycles.iter().cloned().collect();
        recent.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn entity_count(&self) -> Result<usize, StoreError> {
        self.check_online()?;
        Ok(self.rows.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryEntityStore::new();
        let mut entity = TrackedEntity::new("x");
        entity.pressure = 0.42;
        store.upsert_entities(&[entity]).await.unwrap();

        let loaded = store.load_entities().await.unwrap();
        assert_eq!(loaded.entities.len(), 1);
        assert_eq!(loaded.entities[0].pressure, 0.42);
        assert!(loaded.corrupt.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_row_skipped() {
        let store = MemoryEntityStore::new();
        store.upsert_entities(&[TrackedEntity::new("good")]).await.unwrap();
        let mut bad = EntityRow::from_entity(&TrackedEntity::new("bad")).unwrap();
        bad.metrics = serde_json::json!({ "latency": null });
        store.insert_row(bad);

        let loaded = store.load_entities().await.unwrap();
        assert_eq!(loaded.entities.len(), 1);
        assert_eq!(loaded.entities[0].id, "good");
        assert_eq!(loaded.corrupt.len(), 1);
        assert_eq!(loaded.corrupt[0].0, "bad");
    }

    #[tokio::test]
    async fn test_offline_rejects_everything() {
        let store = MemoryEntityStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.upsert_entities(&[TrackedEntity::new("x")]).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.load_entities().await.is_err());

        store.set_offline(false);
        assert!(store.load_entities().await.unwrap().entities.is_empty());
    }
}
