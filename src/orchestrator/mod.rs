//! Orchestrator lifecycle and timers.
//!
//! ```no_run
//! # async fn demo() -> evolution_orchestrator::Result<()> {
//! use evolution_orchestrator::{EvolutionOrchestrator, OrchestratorConfig};
//!
//! let orchestrator = EvolutionOrchestrator::from_config(OrchestratorConfig::default()).await?;
//! orchestrator.initialize().await?;
//! orchestrator.start()?;
//! // ...
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod scheduler;

pub use engine::{EvolutionOrchestrator, InitReport};
pub use scheduler::{FlushJob, PeriodicJob, ScheduledJob, Scheduler, FLUSH_JOB};
