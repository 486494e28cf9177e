//! PostgreSQL entity store.
//!
//! Requires the `postgres` feature flag:
//! ```toml
//! [dependencies]
//! evolution-orchestrator = { features = ["postgres"] }
//! ```

#[cfg(feature = "postgres")]
mod inner {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use sqlx::postgres::PgRow;
    use sqlx::{PgPool, Row};

    use crate::cycle::CycleRecord;
    use crate::entity::TrackedEntity;
    use crate::error::StoreError;
    use crate::persistence::row::EntityRow;
    use crate::persistence::{EntityStore, LoadedEntities};

    fn decode_row(id: &str, row: &PgRow) -> Result<TrackedEntity, StoreError> {
        EntityRow {
            id: id.to_string(),
            state: row.try_get::<Value, _>("state")?,
            traits: row.try_get::<Value, _>("traits")?,
            metrics: row.try_get::<Value, _>("metrics")?,
            history: row.try_get::<Value, _>("history")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        }
        .into_entity()
    }

    /// PostgreSQL store for tracked entities and cycle records.
    #[derive(Debug, Clone)]
    pub struct PgEntityStore {
        pool: PgPool,
    }

    impl PgEntityStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        /// Connect to `database_url` with the default pool settings.
        pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
            let pool = PgPool::connect(database_url).await?;
            Ok(Self::new(pool))
        }
    }

    #[async_trait]
    impl EntityStore for PgEntityStore {
        fn backend(&self) -> &'static str {
            "postgres"
        }

        async fn migrate(&self) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS evolution_entities (
                    id TEXT PRIMARY KEY,
                    state JSONB NOT NULL DEFAULT '{}'::jsonb,
                    traits JSONB NOT NULL DEFAULT '{}'::jsonb,
                    metrics JSONB NOT NULL DEFAULT '{}'::jsonb,
                    history JSONB NOT NULL DEFAULT '[]'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS evolution_cycles (
                    id TEXT PRIMARY KEY,
                    cycle TEXT NOT NULL,
                    recorded_at TIMESTAMPTZ NOT NULL,
                    changes JSONB NOT NULL DEFAULT 'null'::jsonb
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_evolution_cycles_recorded
                 ON evolution_cycles (recorded_at DESC)",
            )
            .execute(&self.pool)
            .await?;

            log::debug!("PostgreSQL evolution tables migrated");
            Ok(())
        }

        async fn upsert_entities(&self, entities: &[TrackedEntity]) -> Result<usize, StoreError> {
            let mut tx = self.pool.begin().await?;
            for entity in entities {
                let row = EntityRow::from_entity(entity)?;
                sqlx::query(
                    r#"
                    INSERT INTO evolution_entities
                        (id, state, traits, metrics, history, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (id) DO UPDATE SET
                        state = EXCLUDED.state,
                        traits = EXCLUDED.traits,
                        metrics = EXCLUDED.metrics,
                        history = EXCLUDED.history,
                        created_at = EXCLUDED.created_at,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(&row.id)
                .bind(&row.state)
                .bind(&row.traits)
                .bind(&row.metrics)
                .bind(&row.history)
                .bind(row.created_at)
                .bind(row.updated_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(entities.len())
        }

        async fn load_entities(&self) -> Result<LoadedEntities, StoreError> {
            let rows = sqlx::query(
                r#"
                SELECT id, state, traits, metrics, history, created_at, updated_at
                FROM evolution_entities
                ORDER BY id
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let mut loaded = LoadedEntities::default();
            for row in rows {
                let id: String = row.try_get("id")?;
                let decoded = decode_row(&id, &row);
                loaded.push(id, decoded);
            }
            Ok(loaded)
        }

        async fn append_cycle(&self, record: &CycleRecord) -> Result<(), StoreError> {
            sqlx::query(
                r#"
                INSERT INTO evolution_cycles (id, cycle, recorded_at, changes)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&record.id)
            .bind(&record.cycle)
            .bind(record.recorded_at)
            .bind(&record.changes)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>, StoreError> {
            let rows = sqlx::query(
                r#"
                SELECT id, cycle, recorded_at, changes
                FROM evolution_cycles
                ORDER BY recorded_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

            rows.into_iter()
                .map(|row| -> Result<CycleRecord, StoreError> {
                    Ok(CycleRecord {
                        id: row.try_get("id")?,
                        cycle: row.try_get("cycle")?,
                        recorded_at: row.try_get("recorded_at")?,
                        changes: row.try_get("changes")?,
                    })
                })
                .collect()
        }

        async fn entity_count(&self) -> Result<usize, StoreError> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM evolution_entities")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as usize)
        }
    }
}

#[cfg(feature = "postgres")]
pub use inner::*;
