//! Durable storage for the entity registry.
//!
//! [`EntityStore`] is the backend seam; [`PersistenceAdapter`] wraps an
//! optional store with the soft-fail policy the orchestrator relies on.
//!
//! # Backends
//!
//! - [`SqliteEntityStore`]: file or in-memory SQLite via rusqlite
//! - [`PgEntityStore`]: PostgreSQL via sqlx (feature `postgres`)
//! - [`MemoryEntityStore`]: process-local, for tests and dry runs

pub mod adapter;
pub mod memory_store;
pub mod pg_store;
pub mod row;
pub mod sqlite_store;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{PersistenceConfig, StoreBackend};
use crate::cycle::CycleRecord;
use crate::entity::TrackedEntity;
use crate::error::StoreError;

pub use adapter::{FlushReport, LoadReport, PersistenceAdapter};
pub use memory_store::MemoryEntityStore;
#[cfg(feature = "postgres")]
pub use pg_store::PgEntityStore;
pub use row::EntityRow;
pub use sqlite_store::SqliteEntityStore;

/// Storage backend for entities and cycle records.
///
/// Upserts overwrite every column of an existing row; there is no
/// field-level merge and no version check.
#[async_trait]
pub trait EntityStore: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Create tables if they do not exist.
    async fn migrate(&self) -> Result<(), StoreError>;

    /// Insert or overwrite one row per entity. Returns the number written.
    async fn upsert_entities(&self, entities: &[TrackedEntity]) -> Result<usize, StoreError>;

    /// Every stored entity. Rows that fail to decode are collected in
    /// [`LoadedEntities::corrupt`] instead of failing the whole load.
    async fn load_entities(&self) -> Result<LoadedEntities, StoreError>;

    /// Append one cycle record.
    async fn append_cycle(&self, record: &CycleRecord) -> Result<(), StoreError>;

    /// Up to `limit` most recent cycle records, newest first.
    async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>, StoreError>;

    /// Number of stored entity rows.
    async fn entity_count(&self) -> Result<usize, StoreError>;
}

/// Decoded rows from [`EntityStore::load_entities`].
#[derive(Debug, Default)]
pub struct LoadedEntities {
    pub entities: Vec<TrackedEntity>,
    /// `(id, reason)` for each row that could not be decoded.
    pub corrupt: Vec<(String, String)>,
}

impl LoadedEntities {
    /// Keep a decoded entity or record why row `id` was skipped.
    pub fn push(&mut self, id: String, decoded: Result<TrackedEntity, StoreError>) {
        match decoded {
            Ok(entity) => self.entities.push(entity),
            Err(e) => self.corrupt.push((id, e.to_string())),
        }
    }
}

/// Open the store selected by `config`, or `None` when persistence is off.
pub async fn open_store(
    config: &PersistenceConfig,
) -> Result<Option<Arc<dyn EntityStore>>, StoreError> {
    if !config.enabled {
        return Ok(None);
    }
    let store: Arc<dyn EntityStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryEntityStore::new()),
        StoreBackend::Sqlite => Arc::new(SqliteEntityStore::open(&config.path)?),
        StoreBackend::Postgres => open_postgres(config).await?,
    };
    log::info!("Opened {} store", store.backend());
    Ok(Some(store))
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &PersistenceConfig) -> Result<Arc<dyn EntityStore>, StoreError> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Unavailable("no database_url configured".into()))?;
    Ok(Arc::new(PgEntityStore::connect(url).await?))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &PersistenceConfig) -> Result<Arc<dyn EntityStore>, StoreError> {
    Err(StoreError::Unavailable(
        "built without the `postgres` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loaded_entities_splits_corrupt_rows() {
        let mut loaded = LoadedEntities::default();
        loaded.push("a".into(), Ok(TrackedEntity::new("a")));
        loaded.push(
            "b".into(),
            Err(StoreError::Corrupt {
                id: "b".into(),
                message: "metrics: bad".into(),
            }),
        );
        assert_eq!(loaded.entities.len(), 1);
        assert_eq!(loaded.corrupt.len(), 1);
        assert_eq!(loaded.corrupt[0].0, "b");
        assert!(loaded.corrupt[0].1.contains("metrics"));
    }

    #[tokio::test]
    async fn test_open_store_disabled() {
        let config = PersistenceConfig::default();
        assert!(open_store(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_store_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            enabled: true,
            backend: StoreBackend::Sqlite,
            path: dir.path().join("nested/evolution.db"),
            ..Default::default()
        };
        let store = open_store(&config).await.unwrap().unwrap();
        assert_eq!(store.backend(), "sqlite");
        store.migrate().await.unwrap();
        assert_eq!(store.entity_count().await.unwrap(), 0);
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_open_store_postgres_without_feature() {
        let config = PersistenceConfig {
            enabled: true,
            backend: StoreBackend::Postgres,
            database_url: Some("postgres://localhost/evolution".into()),
            ..Default::default()
        };
        assert!(matches!(open_store(&config).await, Err(StoreError::Unavailable(_))));
    }
}
