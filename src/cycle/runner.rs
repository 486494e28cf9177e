//! Runs one cycle over every entity in the registry.
//!
//! Each entity is processed on its own task, under its own lock, bounded by
//! the handler timeout. A failing, hanging or panicking entity is recorded
//! in the report and the rest of the cycle carries on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;

use super::handler::{CycleContext, CycleHandler};
use super::record::{CycleLog, CycleRecord};
use crate::entity::{EntityRegistry, EntityUpdate, MutationKind};
use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, OrchestratorEvent};
use crate::orchestrator::scheduler::PeriodicJob;
use crate::persistence::PersistenceAdapter;

/// One entity that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityFailure {
    pub entity_id: String,
    pub error: String,
}

/// Successful processing of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    pub entity_id: String,
    pub update: EntityUpdate,
    pub evolved: Option<MutationKind>,
    pub generation: u64,
}

/// Batch result of one cycle invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Entities processed successfully.
    pub processed: usize,
    /// Ids processed successfully, sorted.
    pub entity_ids: Vec<String>,
    pub failures: Vec<EntityFailure>,
    /// Ids that evolved during this cycle.
    pub evolved: Vec<String>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything needed to run one named cycle.
pub struct CycleRunner {
    name: String,
    handler: Arc<dyn CycleHandler>,
    registry: Arc<EntityRegistry>,
    log: Arc<CycleLog>,
    events: EventBus,
    persistence: Arc<PersistenceAdapter>,
    timeout: Duration,
}

impl CycleRunner {
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn CycleHandler>,
        registry: Arc<EntityRegistry>,
        log: Arc<CycleLog>,
        events: EventBus,
        persistence: Arc<PersistenceAdapter>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            registry,
            log,
            events,
            persistence,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process every tracked entity once and report the outcome.
    pub async fn run_once(&self) -> CycleReport {
        let mut ctx = CycleContext::new(self.name.clone());
        ctx.since_last_run = self.log.time_since_last(&self.name, ctx.now);
        let started_at = ctx.now;
        let ctx = Arc::new(ctx);

        let ids = self.registry.ids();
        let tasks = ids.iter().map(|id| {
            tokio::spawn(process_entity(
                Arc::clone(&self.handler),
                Arc::clone(&self.registry),
                Arc::clone(&ctx),
                id.clone(),
                self.timeout,
            ))
        });
        let results = join_all(tasks).await;

        let mut report = CycleReport {
            cycle: self.name.clone(),
            started_at,
            finished_at: started_at,
            processed: 0,
            entity_ids: Vec::new(),
            failures: Vec::new(),
            evolved: Vec::new(),
        };
        let mut updates = BTreeMap::new();

        for (id, result) in ids.into_iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(join_error) => Err(OrchestratorError::handler(format!(
                    "handler task aborted: {join_error}"
                ))),
            };
            match outcome {
                Ok(change) => {
                    if let Some(kind) = change.evolved {
                        report.evolved.push(id.clone());
                        self.events.emit(OrchestratorEvent::EntityEvolved {
                            entity_id: id.clone(),
                            kind,
                            generation: change.generation,
                        });
                    }
                    if !change.update.is_empty() {
                        updates.insert(id.clone(), change.update);
                    }
                    report.processed += 1;
                    report.entity_ids.push(id);
                }
                Err(e) => {
                    log::warn!("[{}] entity '{}' failed: {}", self.name, id, e);
                    report.failures.push(EntityFailure {
                        entity_id: id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.finished_at = Utc::now();

        let record = CycleRecord::new(
            self.name.clone(),
            json!({
                "processed": report.processed,
                "failed": report.failures.len(),
                "evolved": report.evolved,
                "updates": updates,
            }),
        );
        self.log.append(record.clone());
        // Soft-fail: the adapter already logged and emitted the error.
        let _ = self.persistence.record_cycle(&record).await;

        log::info!(
            "[{}] cycle complete: {} processed, {} failed, {} evolved",
            self.name,
            report.processed,
            report.failures.len(),
            report.evolved.len()
        );
        self.events.emit(OrchestratorEvent::CycleCompleted {
            cycle: self.name.clone(),
            processed: report.processed,
            failed: report.failures.len(),
            entity_ids: report.entity_ids.clone(),
            finished_at: report.finished_at,
        });
        report
    }
}

#[async_trait]
impl PeriodicJob for CycleRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) {
        self.run_once().await;
    }
}

/// Lock one entity, run the handler, merge its update. The whole sequence,
/// including waiting for the lock, is bounded by `timeout`.
async fn process_entity(
    handler: Arc<dyn CycleHandler>,
    registry: Arc<EntityRegistry>,
    ctx: Arc<CycleContext>,
    id: String,
    timeout: Duration,
) -> Result<EntityChange> {
    let handle = registry.get_or_create(&id);
    let history_limit = registry.history_limit();
    let work = async {
        let mut entity = handle.lock().await;
        let outcome = handler.process(&ctx, &entity).await?;
        let update = outcome.update.clone();
        outcome.update.apply_to(&mut entity, history_limit);
        Ok::<_, OrchestratorError>(EntityChange {
            entity_id: id.clone(),
            update,
            evolved: outcome.evolved,
            generation: entity.generation,
        })
    };
    tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| OrchestratorError::HandlerTimeout(timeout))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::cycle::handler::EntityOutcome;
    use crate::entity::TrackedEntity;

    /// Counts calls and fails for one chosen id.
    struct FlakyHandler {
        fail_for: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CycleHandler for FlakyHandler {
        async fn process(
            &self,
            _ctx: &CycleContext,
            entity: &TrackedEntity,
        ) -> Result<EntityOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if entity.id == self.fail_for {
                return Err(OrchestratorError::handler("boom"));
            }
            Ok(EntityUpdate::default().pressure(0.5).into())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl CycleHandler for PanickingHandler {
        async fn process(
            &self,
            _ctx: &CycleContext,
            entity: &TrackedEntity,
        ) -> Result<EntityOutcome> {
            if entity.id == "a" {
                panic!("handler bug");
            }
            Ok(EntityOutcome::default())
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl CycleHandler for SlowHandler {
        async fn process(
            &self,
            _ctx: &CycleContext,
            entity: &TrackedEntity,
        ) -> Result<EntityOutcome> {
            if entity.id == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(EntityUpdate::default().fitness(1.0).into())
        }
    }

    fn build_runner(
        handler: Arc<dyn CycleHandler>,
        registry: Arc<EntityRegistry>,
    ) -> (CycleRunner, EventBus, Arc<CycleLog>) {
        let events = EventBus::default();
        let log = Arc::new(CycleLog::default());
        let persistence = Arc::new(PersistenceAdapter::disabled(registry.clone(), events.clone()));
        let runner = CycleRunner::new(
            "micro_evolution",
            handler,
            registry,
            log.clone(),
            events.clone(),
            persistence,
            Duration::from_secs(5),
        );
        (runner, events, log)
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_entity() {
        let registry = Arc::new(EntityRegistry::default());
        registry.get_or_create("a");
        registry.get_or_create("b");
        let handler = Arc::new(FlakyHandler {
            fail_for: "a",
            calls: AtomicUsize::new(0),
        });
        let (runner, _, _) = build_runner(handler.clone(), registry.clone());

        let report = runner.run_once().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.processed, 1);
        assert_eq!(report.entity_ids, vec!["b"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity_id, "a");
        assert_eq!(registry.snapshot("b").await.unwrap().pressure, 0.5);
        assert_eq!(registry.snapshot("a").await.unwrap().pressure, 0.0);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_per_entity() {
        let registry = Arc::new(EntityRegistry::default());
        registry.get_or_create("a");
        registry.get_or_create("b");
        let (runner, _, _) = build_runner(Arc::new(PanickingHandler), registry);

        let report = runner.run_once().await;
        assert_eq!(report.entity_ids, vec!["b"]);
        assert_eq!(report.failures[0].entity_id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let registry = Arc::new(EntityRegistry::default());
        registry.get_or_create("slow");
        registry.get_or_create("fast");
        let (runner, _, _) = build_runner(Arc::new(SlowHandler), registry.clone());

        let report = runner.run_once().await;
        assert_eq!(report.entity_ids, vec!["fast"]);
        assert!(report.failures[0].error.contains("timed out"));
        // Cancelled before merging: no partial update.
        assert_eq!(registry.snapshot("slow").await.unwrap().fitness, 0.0);
    }

    #[tokio::test]
    async fn test_emits_completion_and_logs_record() {
        let registry = Arc::new(EntityRegistry::default());
        registry.get_or_create("a");
        let handler = Arc::new(FlakyHandler {
            fail_for: "none",
            calls: AtomicUsize::new(0),
        });
        let (runner, events, log) = build_runner(handler, registry);
        let mut rx = events.subscribe();

        runner.run_once().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "micro_evolution_complete");
        match event {
            OrchestratorEvent::CycleCompleted { processed, entity_ids, .. } => {
                assert_eq!(processed, 1);
                assert_eq!(entity_ids, vec!["a"]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let record = log.last("micro_evolution").unwrap();
        assert_eq!(record.changes["processed"], 1);
        assert_eq!(record.changes["updates"]["a"]["pressure"], 0.5);
    }

    #[tokio::test]
    async fn test_empty_registry_still_records_cycle() {
        let registry = Arc::new(EntityRegistry::default());
        let handler = Arc::new(FlakyHandler {
            fail_for: "none",
            calls: AtomicUsize::new(0),
        });
        let (runner, _, log) = build_runner(handler, registry);
        let report = runner.run_once().await;
        assert_eq!(report.processed, 0);
        assert!(report.is_clean());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_since_last_run_populated_on_second_run() {
        struct SeenPrevious(parking_lot::Mutex<Vec<bool>>);

        #[async_trait]
        impl CycleHandler for SeenPrevious {
            async fn process(
                &self,
                ctx: &CycleContext,
                _e: &TrackedEntity,
            ) -> Result<EntityOutcome> {
                self.0.lock().push(ctx.since_last_run.is_some());
                Ok(EntityOutcome::default())
            }
        }

        let registry = Arc::new(EntityRegistry::default());
        registry.get_or_create("a");
        let seen = Arc::new(SeenPrevious(parking_lot::Mutex::new(Vec::new())));
        let (runner, _, _) = build_runner(seen.clone(), registry);
        runner.run_once().await;
        runner.run_once().await;
        assert_eq!(*seen.0.lock(), vec![false, true]);
    }

    /// Reads the generation, yields, then writes it back incremented.
    struct IncrementGeneration;

    #[async_trait]
    impl CycleHandler for IncrementGeneration {
        async fn process(
            &self,
            _ctx: &CycleContext,
            entity: &TrackedEntity,
        ) -> Result<EntityOutcome> {
            let next = entity.generation + 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(EntityUpdate {
                generation: Some(next),
                ..Default::default()
            }
            .into())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_runs_do_not_lose_updates() {
        let registry = Arc::new(EntityRegistry::default());
        registry.get_or_create("shared");
        let (runner, _, _) = build_runner(Arc::new(IncrementGeneration), registry.clone());

        let (first, second, third) =
            tokio::join!(runner.run_once(), runner.run_once(), runner.run_once());
        for report in [first, second, third] {
            assert!(report.is_clean());
            assert_eq!(report.processed, 1);
        }
        assert_eq!(registry.snapshot("shared").await.unwrap().generation, 3);
    }
}
