//! SQLite entity store.
//!
//! rusqlite is synchronous, so every operation runs on tokio's blocking
//! pool against a single connection guarded by a mutex.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::row::{parse_timestamp, EntityRow};
use super::{EntityStore, LoadedEntities};
use crate::cycle::CycleRecord;
use crate::entity::TrackedEntity;
use crate::error::StoreError;

const CREATE_ENTITIES: &str = "CREATE TABLE IF NOT EXISTS evolution_entities (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT '{}',
    traits TEXT NOT NULL DEFAULT '{}',
    metrics TEXT NOT NULL DEFAULT '{}',
    history TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const CREATE_CYCLES: &str = "CREATE TABLE IF NOT EXISTS evolution_cycles (
    id TEXT PRIMARY KEY,
    cycle TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    changes TEXT NOT NULL DEFAULT 'null'
)";

const UPSERT_ENTITY: &str = "INSERT INTO evolution_entities
        (id, state, traits, metrics, history, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (id) DO UPDATE SET
        state = excluded.state,
        traits = excluded.traits,
        metrics = excluded.metrics,
        history = excluded.history,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at";

/// Text columns of one `evolution_entities` row.
struct RawRow {
    id: String,
    state: String,
    traits: String,
    metrics: String,
    history: String,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn decode(self) -> Result<TrackedEntity, StoreError> {
        let id = self.id;
        let column = |name: &str, text: &str| -> Result<serde_json::Value, StoreError> {
            serde_json::from_str(text).map_err(|e| StoreError::Corrupt {
                id: id.clone(),
                message: format!("{name}: {e}"),
            })
        };
        EntityRow {
            created_at: parse_timestamp(&id, &self.created_at)?,
            updated_at: parse_timestamp(&id, &self.updated_at)?,
            state: column("state", &self.state)?,
            traits: column("traits", &self.traits)?,
            metrics: column("metrics", &self.metrics)?,
            history: column("history", &self.history)?,
            id: id.clone(),
        }
        .into_entity()
    }
}

/// SQLite-backed [`EntityStore`].
#[derive(Debug, Clone)]
pub struct SqliteEntityStore {
    /// Database location, `None` for an in-memory database.
    pub db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        Ok(Self {
            db_path: Some(path),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db_path: None,
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        })
    }

    /// Run `op` with the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {e}")))?;
            op(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(CREATE_ENTITIES, [])?;
            conn.execute(CREATE_CYCLES, [])?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_evolution_cycles_recorded
                 ON evolution_cycles(recorded_at)",
                [],
            )?;
            log::debug!("SQLite evolution tables migrated");
            Ok(())
        })
        .await
    }

    async fn upsert_entities(&self, entities: &[TrackedEntity]) -> Result<usize, StoreError> {
        let rows = entities
            .iter()
            .map(EntityRow::from_entity)
            .collect::<Result<Vec<_>, _>>()?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT_ENTITY)?;
                for row in &rows {
                    stmt.execute(params![
                        row.id,
                        row.state.to_string(),
                        row.traits.to_string(),
                        row.metrics.to_string(),
                        row.history.to_string(),
                        row.created_at.to_rfc3339(),
                        row.updated_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }

    async fn load_entities(&self) -> Result<LoadedEntities, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, state, traits, metrics, history, created_at, updated_at
                 FROM evolution_entities
                 ORDER BY id",
            )?;
            let raw = stmt
                .query_map([], |row| {
                    Ok(RawRow {
                        id: row.get(0)?,
                        state: row.get(1)?,
                        traits: row.get(2)?,
                        metrics: row.get(3)?,
                        history: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut loaded = LoadedEntities::default();
            for raw in raw {
                let id = raw.id.clone();
                loaded.push(id, raw.decode());
            }
            Ok(loaded)
        })
        .await
    }

    async fn append_cycle(&self, record: &CycleRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO evolution_cycles (id, cycle, recorded_at, changes)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id,
                    record.cycle,
                    record.recorded_at.to_rfc3339(),
                    record.changes.to_string(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, cycle, recorded_at, changes
                 FROM evolution_cycles
                 ORDER BY recorded_at DESC
                 LIMIT ?1",
            )?;
            let raw = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            raw.into_iter()
                .map(|(id, cycle, recorded_at, changes)| -> Result<CycleRecord, StoreError> {
                    Ok(CycleRecord {
                        recorded_at: parse_timestamp(&id, &recorded_at)?,
                        changes: serde_json::from_str(&changes)?,
                        cycle,
                        id,
                    })
                })
                .collect()
        })
        .await
    }

    async fn entity_count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: Option<i64> = conn
                .query_row("SELECT COUNT(*) FROM evolution_entities", [], |row| row.get(0))
                .optional()?;
            Ok(count.unwrap_or(0) as usize)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
