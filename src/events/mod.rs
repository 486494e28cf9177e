//! Orchestrator event system.
//!
//! Observers either take the raw stream with [`EventBus::subscribe`] or
//! register a handler for one event name with [`EventBus::on`]. Event names
//! are stable strings such as `"micro_evolution_complete"`.

pub mod event_bus;
pub mod types;

pub use event_bus::{EventBus, EventHandler, DEFAULT_EVENT_CAPACITY};
pub use types::{
    cycle_complete_event, OrchestratorEvent, ENTITY_EVOLVED, FLUSH_COMPLETE,
    ORCHESTRATOR_STARTED, ORCHESTRATOR_STOPPED, PERSISTENCE_FAILED,
};
