//! # evolution-orchestrator
//!
//! A periodic multi-timer orchestrator. Independent cycles run on their own
//! timers over a shared registry of tracked entities, score them with
//! pluggable heuristic scorers, evolve the ones that cross a threshold and
//! flush snapshots to a relational store.
//!
//! - [`entity`]: the registry, one async lock per entity
//! - [`scoring`]: the [`Scorer`] strategy and the configurable weighted scorer
//! - [`cycle`]: cycle handlers, the per-cycle runner and the cycle log
//! - [`orchestrator`]: timers and the [`EvolutionOrchestrator`] lifecycle
//! - [`persistence`]: SQLite, PostgreSQL and in-memory stores
//! - [`events`]: broadcast bus of [`OrchestratorEvent`]s
//! - [`server`]: axum status API

pub mod config;
pub mod cycle;
pub mod entity;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod persistence;
pub mod scoring;
pub mod server;

pub use config::{CycleConfig, OrchestratorConfig, PersistenceConfig, StoreBackend};
pub use cycle::{CycleHandler, CycleReport, EvolutionThresholds};
pub use entity::{EntityRegistry, EntityUpdate, TrackedEntity};
pub use error::{ConfigError, OrchestratorError, Result, StoreError};
pub use events::{EventBus, OrchestratorEvent};
pub use orchestrator::{EvolutionOrchestrator, InitReport};
pub use persistence::{EntityStore, FlushReport, PersistenceAdapter};
pub use scoring::{ScoreSnapshot, Scorer, Signals, WeightedScorer};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
