//! Cycles: named periodic passes over the entity registry.
//!
//! A [`CycleHandler`] decides what happens to one entity; a [`CycleRunner`]
//! fans the handler out over every entity and records the result in the
//! [`CycleLog`].

pub mod evolution;
pub mod handler;
pub mod record;
pub mod runner;

pub use evolution::{
    EvolutionThresholds, MajorEvolution, MicroEvolution, MAJOR_EVOLUTION, MICRO_EVOLUTION,
};
pub use handler::{CycleContext, CycleHandler, EntityOutcome, ScorerCycle};
pub use record::{CycleLog, CycleRecord, DEFAULT_CYCLE_LOG_CAPACITY};
pub use runner::{CycleReport, CycleRunner, EntityChange, EntityFailure};
