//! Event payloads emitted by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::MutationKind;

/// Event name emitted when the orchestrator starts its timers.
pub const ORCHESTRATOR_STARTED: &str = "orchestrator_started";
/// Event name emitted when the orchestrator stops its timers.
pub const ORCHESTRATOR_STOPPED: &str = "orchestrator_stopped";
/// Event name emitted for every entity that evolved during a cycle.
pub const ENTITY_EVOLVED: &str = "entity_evolved";
/// Event name emitted after a successful flush.
pub const FLUSH_COMPLETE: &str = "flush_complete";
/// Event name emitted when the store rejects a read or write.
pub const PERSISTENCE_FAILED: &str = "persistence_failed";

/// Everything the orchestrator reports to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A cycle finished one pass over the registry.
    CycleCompleted {
        cycle: String,
        processed: usize,
        failed: usize,
        entity_ids: Vec<String>,
        finished_at: DateTime<Utc>,
    },
    /// An entity crossed a threshold and mutated.
    EntityEvolved {
        entity_id: String,
        kind: MutationKind,
        generation: u64,
    },
    FlushCompleted {
        written: usize,
    },
    PersistenceFailed {
        operation: String,
        error: String,
    },
    Started {
        cycles: Vec<String>,
    },
    Stopped,
}

impl OrchestratorEvent {
    /// Stable string name consumers subscribe by.
    ///
    /// Cycle completions are named after their cycle, e.g.
    /// `"micro_evolution_complete"`.
    pub fn name(&self) -> String {
        match self {
            OrchestratorEvent::CycleCompleted { cycle, .. } => cycle_complete_event(cycle),
            OrchestratorEvent::EntityEvolved { .. } => ENTITY_EVOLVED.to_string(),
            OrchestratorEvent::FlushCompleted { .. } => FLUSH_COMPLETE.to_string(),
            OrchestratorEvent::PersistenceFailed { .. } => PERSISTENCE_FAILED.to_string(),
            OrchestratorEvent::Started { .. } => ORCHESTRATOR_STARTED.to_string(),
            OrchestratorEvent::Stopped => ORCHESTRATOR_STOPPED.to_string(),
        }
    }
}

/// Name of the completion event for `cycle`.
pub fn cycle_complete_event(cycle: &str) -> String {
    format!("{cycle}_complete")
}
