//! Per-entity cycle handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::entity::{EntityUpdate, MutationKind, TrackedEntity};
use crate::error::Result;
use crate::scoring::{Scorer, Signals};

/// Read-only context shared by every entity in one cycle invocation.
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// Name of the running cycle.
    pub cycle: String,
    /// Wall-clock time the invocation started.
    pub now: DateTime<Utc>,
    /// Time since this cycle last completed, if it ever did.
    pub since_last_run: Option<Duration>,
}

impl CycleContext {
    pub fn new(cycle: impl Into<String>) -> Self {
        Self {
            cycle: cycle.into(),
            now: Utc::now(),
            since_last_run: None,
        }
    }
}

/// What a handler wants done to one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityOutcome {
    pub update: EntityUpdate,
    /// Set when the entity mutated during this cycle.
    pub evolved: Option<MutationKind>,
}

impl From<EntityUpdate> for EntityOutcome {
    fn from(update: EntityUpdate) -> Self {
        Self {
            update,
            evolved: None,
        }
    }
}

/// Processes one entity during a cycle.
///
/// The runner holds the entity's lock for the duration of `process` and
/// merges the returned update before releasing it.
#[async_trait]
pub trait CycleHandler: Send + Sync {
    async fn process(&self, ctx: &CycleContext, entity: &TrackedEntity) -> Result<EntityOutcome>;
}

/// Adapts any [`Scorer`] into a cycle that rescores every entity.
pub struct ScorerCycle {
    scorer: Arc<dyn Scorer>,
}

impl ScorerCycle {
    pub fn new(scorer: Arc<dyn Scorer>) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl CycleHandler for ScorerCycle {
    async fn process(&self, ctx: &CycleContext, entity: &TrackedEntity) -> Result<EntityOutcome> {
        let signals = Signals::for_entity(entity, ctx.now);
        Ok(self.scorer.score(entity, &signals).into())
    }
}
