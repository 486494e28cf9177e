//! Scorer plugin interface.
//!
//! A [`Scorer`] reads an entity's current state plus auxiliary signals and
//! returns a partial [`EntityUpdate`]. Scorers never touch the registry
//! themselves; the registry merges what they return.
//!
//! [`WeightedScorer`] is the configurable built-in strategy. Its default
//! weights are placeholders and carry no empirical meaning.

pub mod weighted;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityUpdate, TrackedEntity};

pub use weighted::{ScorerConfig, Transform, WeightedScorer, WeightedTerm};

/// Signal name for hours since the entity last evolved.
pub const HOURS_SINCE_EVOLUTION: &str = "hours_since_evolution";
/// Signal name for days since the entity last evolved.
pub const DAYS_SINCE_EVOLUTION: &str = "days_since_evolution";

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Named numeric sub-signals handed to scorers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signals(BTreeMap<String, f64>);

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals for `entity`: its recorded metrics plus derived time signals.
    pub fn for_entity(entity: &TrackedEntity, now: DateTime<Utc>) -> Self {
        let mut signals = Self(entity.metrics.clone());
        let hours = entity.hours_since_evolution(now);
        signals.set(HOURS_SINCE_EVOLUTION, hours);
        signals.set(DAYS_SINCE_EVOLUTION, hours / 24.0);
        signals
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

impl From<BTreeMap<String, f64>> for Signals {
    fn from(map: BTreeMap<String, f64>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// A scoring strategy producing a partial update for one entity.
pub trait Scorer: Send + Sync {
    fn score(&self, entity: &TrackedEntity, aux: &Signals) -> EntityUpdate;
}

impl<F> Scorer for F
where
    F: Fn(&TrackedEntity, &Signals) -> EntityUpdate + Send + Sync,
{
    fn score(&self, entity: &TrackedEntity, aux: &Signals) -> EntityUpdate {
        self(entity, aux)
    }
}

/// Score field a [`WeightedScorer`] writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    Pressure,
    Stagnation,
    Fitness,
}

impl ScoreField {
    /// Build the single-field update for `value`.
    pub fn update(self, value: f64) -> EntityUpdate {
        let update = EntityUpdate::default();
        match self {
            ScoreField::Pressure => update.pressure(value),
            ScoreField::Stagnation => update.stagnation(value),
            ScoreField::Fitness => update.fitness(value),
        }
    }

    /// Read the field back from an update.
    pub fn read(self, update: &EntityUpdate) -> Option<f64> {
        match self {
            ScoreField::Pressure => update.pressure,
            ScoreField::Stagnation => update.stagnation,
            ScoreField::Fitness => update.fitness,
        }
    }
}

// ---------------------------------------------------------------------------
// ScoreSnapshot
// ---------------------------------------------------------------------------

/// Derived scores for one entity. Recomputed on every access, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub pressure: f64,
    pub stagnation: f64,
    pub fitness: f64,
}

/// The three configured scorers used by the built-in cycles.
#[derive(Debug, Clone)]
pub struct ScoringSuite {
    pub pressure: WeightedScorer,
    pub stagnation: WeightedScorer,
    pub fitness: WeightedScorer,
}

impl ScoringSuite {
    pub fn new(pressure: ScorerConfig, stagnation: ScorerConfig, fitness: ScorerConfig) -> Self {
        Self {
            pressure: WeightedScorer::new(pressure),
            stagnation: WeightedScorer::new(stagnation),
            fitness: WeightedScorer::new(fitness),
        }
    }

    /// Compute a fresh snapshot for `entity`.
    pub fn snapshot(&self, entity: &TrackedEntity, now: DateTime<Utc>) -> ScoreSnapshot {
        let signals = Signals::for_entity(entity, now);
        ScoreSnapshot {
            pressure: self.pressure.evaluate(&signals),
            stagnation: self.stagnation.evaluate(&signals),
            fitness: self.fitness.evaluate(&signals),
        }
    }
}

impl Default for ScoringSuite {
    fn default() -> Self {
        Self::new(
            ScorerConfig::default_pressure(),
            ScorerConfig::default_stagnation(),
            ScorerConfig::default_fitness(),
        )
    }
}
