//! Configurable weighted-sum scorer.

use serde::{Deserialize, Serialize};

use super::{ScoreField, Scorer, Signals, DAYS_SINCE_EVOLUTION};
use crate::entity::{clamp_unit, EntityUpdate, TrackedEntity};

/// How a raw signal value is turned into a term contribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// Use the signal as-is.
    #[default]
    Direct,
    /// Shortfall below `target`, never negative.
    Gap { target: f64 },
    /// `value / horizon`, capped at 1.
    Saturate { horizon: f64 },
}

impl Transform {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Transform::Direct => value,
            Transform::Gap { target } => (target - value).max(0.0),
            Transform::Saturate { horizon } => {
                if horizon <= 0.0 {
                    1.0
                } else {
                    (value / horizon).min(1.0)
                }
            }
        }
    }
}

/// One `weight * transform(signal)` term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub signal: String,
    pub weight: f64,
    #[serde(default)]
    pub transform: Transform,
}

impl WeightedTerm {
    pub fn new(signal: impl Into<String>, weight: f64, transform: Transform) -> Self {
        Self {
            signal: signal.into(),
            weight,
            transform,
        }
    }
}

/// Configuration for a [`WeightedScorer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub target: ScoreField,
    #[serde(default)]
    pub terms: Vec<WeightedTerm>,
}

impl ScorerConfig {
    /// Placeholder pressure weights: performance shortfall plus time idle.
    pub fn default_pressure() -> Self {
        Self {
            target: ScoreField::Pressure,
            terms: vec![
                WeightedTerm::new("success_rate", 0.5, Transform::Gap { target: 0.9 }),
                WeightedTerm::new("estimation_accuracy", 0.3, Transform::Gap { target: 0.9 }),
                WeightedTerm::new(DAYS_SINCE_EVOLUTION, 0.2, Transform::Saturate { horizon: 7.0 }),
            ],
        }
    }

    /// Placeholder stagnation weights: mostly time since the last evolution.
    pub fn default_stagnation() -> Self {
        Self {
            target: ScoreField::Stagnation,
            terms: vec![
                WeightedTerm::new(DAYS_SINCE_EVOLUTION, 0.7, Transform::Saturate { horizon: 14.0 }),
                WeightedTerm::new("success_rate", 0.3, Transform::Gap { target: 0.9 }),
            ],
        }
    }

    /// Placeholder fitness weights.
    pub fn default_fitness() -> Self {
        Self {
            target: ScoreField::Fitness,
            terms: vec![
                WeightedTerm::new("success_rate", 0.6, Transform::Direct),
                WeightedTerm::new("estimation_accuracy", 0.4, Transform::Direct),
            ],
        }
    }
}

/// Weighted linear combination of named signals, clamped to `[0, 1]`.
///
/// Missing signals contribute nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedScorer {
    config: ScorerConfig,
}

impl WeightedScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn target(&self) -> ScoreField {
        self.config.target
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Raw weighted sum before clamping.
    pub fn raw(&self, signals: &Signals) -> f64 {
        self.config
            .terms
            .iter()
            .filter_map(|term| {
                signals
                    .get(&term.signal)
                    .map(|value| term.weight * term.transform.apply(value))
            })
            .sum()
    }

    /// Clamped score for `signals`.
    pub fn evaluate(&self, signals: &Signals) -> f64 {
        clamp_unit(self.raw(signals))
    }
}

impl Scorer for WeightedScorer {
    fn score(&self, _entity: &TrackedEntity, aux: &Signals) -> EntityUpdate {
        self.config.target.update(self.evaluate(aux))
    }
}
