//! Soft-failing persistence wrapper around an [`EntityStore`].
//!
//! The in-memory registry is authoritative. Store errors are logged, emitted
//! as [`OrchestratorEvent::PersistenceFailed`], and returned in the report;
//! the next scheduled flush simply tries again.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::EntityStore;
use crate::cycle::CycleRecord;
use crate::entity::EntityRegistry;
use crate::error::StoreError;
use crate::events::{EventBus, OrchestratorEvent};

/// Outcome of one [`PersistenceAdapter::flush`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushReport {
    /// Rows written.
    pub written: usize,
    /// True when persistence is disabled and nothing was attempted.
    pub skipped: bool,
    pub error: Option<String>,
}

impl FlushReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one [`PersistenceAdapter::load`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Entities inserted into the registry.
    pub loaded: usize,
    /// History entries dropped for being older than the retention window.
    pub history_dropped: usize,
    /// Ids of stored rows that could not be decoded and were skipped.
    pub corrupt: Vec<String>,
    pub skipped: bool,
    pub error: Option<String>,
}

/// Flushes the registry to a store and reloads it at startup.
#[derive(Debug)]
pub struct PersistenceAdapter {
    store: RwLock<Option<Arc<dyn EntityStore>>>,
    registry: Arc<EntityRegistry>,
    events: EventBus,
    history_retention: Duration,
}

impl PersistenceAdapter {
    pub fn new(
        store: Arc<dyn EntityStore>,
        registry: Arc<EntityRegistry>,
        events: EventBus,
        history_retention_days: u32,
    ) -> Self {
        Self {
            store: RwLock::new(Some(store)),
            registry,
            events,
            history_retention: Duration::days(i64::from(history_retention_days)),
        }
    }

    /// An adapter with no store; every operation is a no-op.
    pub fn disabled(registry: Arc<EntityRegistry>, events: EventBus) -> Self {
        Self {
            store: RwLock::new(None),
            registry,
            events,
            history_retention: Duration::days(30),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.read().is_some()
    }

    /// Drop the store for the rest of the session.
    pub fn disable(&self) {
        if self.store.write().take().is_some() {
            log::warn!("Persistence disabled; continuing with in-memory state only");
        }
    }

    pub fn store(&self) -> Option<Arc<dyn EntityStore>> {
        self.store.read().clone()
    }

    /// Create tables. Unlike the other operations this propagates errors so
    /// startup can decide whether a missing store is fatal.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        match self.store() {
            Some(store) => store.migrate().await,
            None => Ok(()),
        }
    }

    /// Upsert every entity in the registry.
    pub async fn flush(&self) -> FlushReport {
        let Some(store) = self.store() else {
            return FlushReport {
                skipped: true,
                ..Default::default()
            };
        };

        let entities = self.registry.snapshot_all().await;
        match store.upsert_entities(&entities).await {
            Ok(written) => {
                log::debug!("Flushed {} entities to {}", written, store.backend());
                self.events.emit(OrchestratorEvent::FlushCompleted { written });
                FlushReport {
                    written,
                    ..Default::default()
                }
            }
            Err(e) => {
                self.report_failure("flush", &e);
                FlushReport {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    /// Populate the registry from the store, trimming history to the
    /// retention window.
    pub async fn load(&self) -> LoadReport {
        let Some(store) = self.store() else {
            return LoadReport {
                skipped: true,
                ..Default::default()
            };
        };

        let loaded = match store.load_entities().await {
            Ok(loaded) => loaded,
            Err(e) => {
                self.report_failure("load", &e);
                return LoadReport {
                    error: Some(e.to_string()),
                    ..Default::default()
                };
            }
        };

        let cutoff = Utc::now() - self.history_retention;
        let mut report = LoadReport::default();
        for (id, reason) in loaded.corrupt {
            log::warn!("Skipping corrupt row '{}': {}", id, reason);
            report.corrupt.push(id);
        }
        for mut entity in loaded.entities {
            let before = entity.history.len();
            entity.retain_history_since(cutoff);
            entity.truncate_history(self.registry.history_limit());
            report.history_dropped += before - entity.history.len();
            self.registry.insert(entity);
            report.loaded += 1;
        }
        log::info!(
            "Loaded {} entities from {} ({} stale history entries dropped, {} corrupt skipped)",
            report.loaded,
            store.backend(),
            report.history_dropped,
            report.corrupt.len()
        );
        report
    }

    /// Append a cycle record. Failures are logged and reported, never fatal.
    pub async fn record_cycle(&self, record: &CycleRecord) -> Result<(), StoreError> {
        let Some(store) = self.store() else {
            return Ok(());
        };
        store.append_cycle(record).await.inspect_err(|e| {
            self.report_failure("record_cycle", e);
        })
    }

    fn report_failure(&self, operation: &str, error: &StoreError) {
        log::error!("Persistence {} failed: {}", operation, error);
        self.events.emit(OrchestratorEvent::PersistenceFailed {
            operation: operation.to_string(),
            error: error.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
