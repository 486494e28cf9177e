//! The evolution orchestrator: registry, cycles, timers and persistence
//! wired together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::scheduler::{FlushJob, ScheduledJob, Scheduler, FLUSH_JOB};
use crate::config::OrchestratorConfig;
use crate::cycle::{
    CycleHandler, CycleLog, CycleRecord, CycleReport, CycleRunner, MajorEvolution, MicroEvolution,
    MAJOR_EVOLUTION, MICRO_EVOLUTION,
};
use crate::entity::{EntityRegistry, TrackedEntity};
use crate::error::{OrchestratorError, Result, StoreError};
use crate::events::{EventBus, OrchestratorEvent};
use crate::persistence::{open_store, EntityStore, FlushReport, LoadReport, PersistenceAdapter};
use crate::scoring::{ScoreSnapshot, ScoringSuite};

/// What [`EvolutionOrchestrator::initialize`] did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitReport {
    /// Whether a store is attached after initialization.
    pub persistence_enabled: bool,
    pub backend: Option<String>,
    /// Entities restored from the store.
    pub loaded: usize,
    pub history_dropped: usize,
    /// Stored rows skipped because they could not be decoded.
    pub corrupt: Vec<String>,
    /// Why persistence was switched off, if it was.
    pub degraded: Option<String>,
    /// Registered cycle names.
    pub cycles: Vec<String>,
}

struct RegisteredCycle {
    runner: Arc<CycleRunner>,
    /// Used when the configuration has no entry for this cycle.
    default_interval: Option<Duration>,
}

/// Coordinates periodic cycles over a shared entity registry.
pub struct EvolutionOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<EntityRegistry>,
    log: Arc<CycleLog>,
    events: EventBus,
    persistence: Arc<PersistenceAdapter>,
    scoring: Arc<ScoringSuite>,
    scheduler: Scheduler,
    cycles: RwLock<BTreeMap<String, RegisteredCycle>>,
    /// Store failure seen before `initialize`, reported there.
    startup_error: Mutex<Option<String>>,
}

impl EvolutionOrchestrator {
    /// Build an orchestrator around an already opened store (or none).
    pub fn new(config: OrchestratorConfig, store: Option<Arc<dyn EntityStore>>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(EntityRegistry::new(config.history_limit));
        let events = EventBus::new(config.event_capacity);
        let persistence = Arc::new(match store {
            Some(store) => PersistenceAdapter::new(
                store,
                Arc::clone(&registry),
                events.clone(),
                config.history_retention_days,
            ),
            None => PersistenceAdapter::disabled(Arc::clone(&registry), events.clone()),
        });

        let orchestrator = Self {
            log: Arc::new(CycleLog::new(config.cycle_log_capacity)),
            scoring: Arc::new(config.scoring_suite()),
            scheduler: Scheduler::new(),
            cycles: RwLock::new(BTreeMap::new()),
            startup_error: Mutex::new(None),
            config,
            registry,
            events,
            persistence,
        };

        let thresholds = orchestrator.config.thresholds;
        orchestrator.register_cycle(
            MICRO_EVOLUTION,
            Arc::new(MicroEvolution::new(Arc::clone(&orchestrator.scoring), thresholds)),
            None,
        );
        orchestrator.register_cycle(
            MAJOR_EVOLUTION,
            Arc::new(MajorEvolution::new(Arc::clone(&orchestrator.scoring), thresholds)),
            None,
        );
        Ok(orchestrator)
    }

    /// Build an orchestrator and open the store named in `config`.
    ///
    /// A store that cannot be opened aborts construction only when
    /// `persistence.required` is set; otherwise the orchestrator runs
    /// without persistence and [`InitReport::degraded`] says why.
    pub async fn from_config(config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let (store, startup_error) = match open_store(&config.persistence).await {
            Ok(store) => (store, None),
            Err(e) if config.persistence.required => return Err(e.into()),
            Err(e) => {
                log::error!("Could not open store, continuing without persistence: {}", e);
                (None, Some(e.to_string()))
            }
        };
        let orchestrator = Self::new(config, store)?;
        *orchestrator.startup_error.lock() = startup_error;
        Ok(orchestrator)
    }

    /// Add or replace a cycle. `interval` is used when the configuration
    /// has no entry for `name`; with neither, the cycle only runs through
    /// [`run_cycle_now`](Self::run_cycle_now).
    pub fn register_cycle(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn CycleHandler>,
        interval: Option<Duration>,
    ) {
        let name = name.into();
        let runner = CycleRunner::new(
            name.clone(),
            handler,
            Arc::clone(&self.registry),
            Arc::clone(&self.log),
            self.events.clone(),
            Arc::clone(&self.persistence),
            self.config.handler_timeout(),
        );
        self.cycles.write().insert(
            name,
            RegisteredCycle {
                runner: Arc::new(runner),
                default_interval: interval,
            },
        );
    }

    /// Create tables and restore state from the store.
    pub async fn initialize(&self) -> Result<InitReport> {
        let mut report = InitReport {
            cycles: self.cycle_names(),
            degraded: self.startup_error.lock().take(),
            ..Default::default()
        };

        if let Some(store) = self.persistence.store() {
            match self.restore().await {
                Ok(load) => {
                    report.backend = Some(store.backend().to_string());
                    report.loaded = load.loaded;
                    report.history_dropped = load.history_dropped;
                    report.corrupt = load.corrupt;
                }
                Err(e) if self.config.persistence.required => return Err(e.into()),
                Err(e) => {
                    log::error!("Persistence initialization failed, disabling it: {}", e);
                    self.persistence.disable();
                    report.degraded = Some(e.to_string());
                }
            }
        }
        report.persistence_enabled = self.persistence.is_enabled();
        log::info!(
            "Orchestrator initialized: {} entities loaded, persistence {}",
            report.loaded,
            if report.persistence_enabled { "on" } else { "off" }
        );
        Ok(report)
    }

    async fn restore(&self) -> std::result::Result<LoadReport, StoreError> {
        self.persistence.migrate().await?;
        let load = self.persistence.load().await;
        match load.error {
            Some(message) => Err(StoreError::Unavailable(message)),
            None => Ok(load),
        }
    }

    /// Start one timer per scheduled cycle, plus the flush timer when a
    /// store is attached.
    pub fn start(&self) -> Result<()> {
        let jobs = self.scheduled_jobs();
        let names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
        self.scheduler.start(jobs)?;
        log::info!("Orchestrator started: {}", names.join(", "));
        self.events.emit(OrchestratorEvent::Started { cycles: names });
        Ok(())
    }

    fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        let cycles = self.cycles.read();
        let mut jobs = Vec::new();
        for (name, cycle) in cycles.iter() {
            let interval = match self.config.cycles.get(name) {
                Some(c) if c.enabled => Some(c.interval()),
                Some(_) => None,
                None => cycle.default_interval,
            };
            if let Some(interval) = interval {
                jobs.push(ScheduledJob::new(interval, cycle.runner.clone()));
            }
        }
        for name in self.config.cycles.keys() {
            if !cycles.contains_key(name) {
                log::warn!("No handler registered for configured cycle '{}'", name);
            }
        }
        if self.persistence.is_enabled() {
            jobs.push(ScheduledJob {
                name: FLUSH_JOB.to_string(),
                interval: self.config.flush_interval(),
                job: Arc::new(FlushJob::new(Arc::clone(&self.persistence))),
            });
        }
        jobs
    }

    /// Cancel every timer. In-flight runs finish on their own.
    pub fn stop(&self) {
        if self.scheduler.is_running() {
            self.scheduler.stop();
            self.events.emit(OrchestratorEvent::Stopped);
        }
    }

    /// Stop the timers, then flush once.
    pub async fn shutdown(&self) -> FlushReport {
        self.stop();
        let report = self.persistence.flush().await;
        log::info!("Orchestrator shut down ({} entities flushed)", report.written);
        report
    }

    /// Record observed metrics for an entity, creating it if needed.
    pub async fn observe(&self, id: &str, metrics: BTreeMap<String, f64>) -> TrackedEntity {
        self.registry.record_metrics(id, metrics).await
    }

    /// Run a registered cycle immediately, outside its timer.
    pub async fn run_cycle_now(&self, name: &str) -> Result<CycleReport> {
        let runner = self
            .cycles
            .read()
            .get(name)
            .map(|c| Arc::clone(&c.runner))
            .ok_or_else(|| OrchestratorError::UnknownCycle(name.to_string()))?;
        Ok(runner.run_once().await)
    }

    pub async fn flush(&self) -> FlushReport {
        self.persistence.flush().await
    }

    /// Freshly computed scores for `id`.
    pub async fn score(&self, id: &str) -> Option<ScoreSnapshot> {
        let entity = self.registry.snapshot(id).await?;
        Some(self.scoring.snapshot(&entity, Utc::now()))
    }

    pub async fn entity(&self, id: &str) -> Option<TrackedEntity> {
        self.registry.snapshot(id).await
    }

    pub async fn entities(&self) -> Vec<TrackedEntity> {
        self.registry.snapshot_all().await
    }

    /// Most recent cycle records held in memory, newest first.
    pub fn recent_cycles(&self, limit: usize) -> Vec<CycleRecord> {
        self.log.recent(limit)
    }

    pub fn cycle_names(&self) -> Vec<String> {
        self.cycles.read().keys().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence.is_enabled()
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cycle_log(&self) -> &Arc<CycleLog> {
        &self.log
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
