//! Built-in micro and major evolution cycles.
//!
//! Micro evolution reacts to performance pressure by nudging the weakest
//! character trait. Major evolution reacts to stagnation by advancing the
//! entity to a new generation. Thresholds and step sizes come from
//! configuration.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::handler::{CycleContext, CycleHandler, EntityOutcome};
use crate::entity::{EntityUpdate, MutationKind, MutationRecord, TrackedEntity};
use crate::error::Result;
use crate::scoring::{ScoringSuite, Signals};

/// Name of the built-in micro evolution cycle.
pub const MICRO_EVOLUTION: &str = "micro_evolution";
/// Name of the built-in major evolution cycle.
pub const MAJOR_EVOLUTION: &str = "major_evolution";

/// Thresholds that decide when an entity evolves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvolutionThresholds {
    /// Pressure at or above which a micro evolution happens.
    #[serde(default = "default_micro_pressure")]
    pub micro_pressure: f64,
    /// Stagnation at or above which a major evolution happens.
    #[serde(default = "default_major_stagnation")]
    pub major_stagnation: f64,
    /// Trait increase per unit of pressure.
    #[serde(default = "default_mutation_step")]
    pub mutation_step: f64,
}

fn default_micro_pressure() -> f64 {
    0.3
}

fn default_major_stagnation() -> f64 {
    0.6
}

fn default_mutation_step() -> f64 {
    0.1
}

impl Default for EvolutionThresholds {
    fn default() -> Self {
        Self {
            micro_pressure: default_micro_pressure(),
            major_stagnation: default_major_stagnation(),
            mutation_step: default_mutation_step(),
        }
    }
}

// ---------------------------------------------------------------------------
// MicroEvolution
// ---------------------------------------------------------------------------

/// Rescores pressure and fitness; under enough pressure, strengthens the
/// weakest trait.
pub struct MicroEvolution {
    scoring: Arc<ScoringSuite>,
    thresholds: EvolutionThresholds,
}

impl MicroEvolution {
    pub fn new(scoring: Arc<ScoringSuite>, thresholds: EvolutionThresholds) -> Self {
        Self { scoring, thresholds }
    }
}

#[async_trait]
impl CycleHandler for MicroEvolution {
    async fn process(&self, ctx: &CycleContext, entity: &TrackedEntity) -> Result<EntityOutcome> {
        let signals = Signals::for_entity(entity, ctx.now);
        let pressure = self.scoring.pressure.evaluate(&signals);
        let fitness = self.scoring.fitness.evaluate(&signals);
        let mut update = EntityUpdate::default().pressure(pressure).fitness(fitness);

        if pressure < self.thresholds.micro_pressure {
            return Ok(update.into());
        }

        let mut record = MutationRecord {
            at: ctx.now,
            kind: MutationKind::Micro,
            generation: entity.generation,
            pressure,
            stagnation: entity.stagnation,
            trait_name: None,
            delta: 0.0,
        };
        if let Some((name, value)) = entity.weakest_trait() {
            let target = (value + self.thresholds.mutation_step * pressure).min(1.0);
            record.trait_name = Some(name.to_string());
            record.delta = target - value;
            update.traits.insert(name.to_string(), target);
        }
        log::debug!(
            "[{}] '{}' micro-evolved under pressure {:.3}",
            ctx.cycle,
            entity.id,
            pressure
        );
        update.last_evolution = Some(ctx.now);
        update.push_history.push(record);

        Ok(EntityOutcome {
            update,
            evolved: Some(MutationKind::Micro),
        })
    }
}

// ---------------------------------------------------------------------------
// MajorEvolution
// ---------------------------------------------------------------------------

/// Rescores stagnation; past the threshold, starts a new generation.
pub struct MajorEvolution {
    scoring: Arc<ScoringSuite>,
    thresholds: EvolutionThresholds,
}

impl MajorEvolution {
    pub fn new(scoring: Arc<ScoringSuite>, thresholds: EvolutionThresholds) -> Self {
        Self { scoring, thresholds }
    }
}

#[async_trait]
impl CycleHandler for MajorEvolution {
    async fn process(&self, ctx: &CycleContext, entity: &TrackedEntity) -> Result<EntityOutcome> {
        let signals = Signals::for_entity(entity, ctx.now);
        let stagnation = self.scoring.stagnation.evaluate(&signals);

        if stagnation < self.thresholds.major_stagnation {
            return Ok(EntityUpdate::default().stagnation(stagnation).into());
        }

        let generation = entity.generation + 1;
        log::info!(
            "[{}] '{}' advanced to generation {} (stagnation {:.3})",
            ctx.cycle,
            entity.id,
            generation,
            stagnation
        );
        let update = EntityUpdate {
            generation: Some(generation),
            stagnation: Some(0.0),
            last_evolution: Some(ctx.now),
            push_history: vec![MutationRecord {
                at: ctx.now,
                kind: MutationKind::Major,
                generation,
                pressure: entity.pressure,
                stagnation,
                trait_name: None,
                delta: 0.0,
            }],
            ..Default::default()
        };
        Ok(EntityOutcome {
            update,
            evolved: Some(MutationKind::Major),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
