//! Typed state for tracked entities.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Clamp a score into `[0, 1]`. NaN collapses to `0.0`.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// MutationRecord
// ---------------------------------------------------------------------------

/// Which cycle produced a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Micro,
    Major,
}

/// A single entry in an entity's mutation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// When the mutation was applied.
    pub at: DateTime<Utc>,
    pub kind: MutationKind,
    /// Generation after the mutation.
    pub generation: u64,
    pub pressure: f64,
    pub stagnation: f64,
    /// Character trait touched by the mutation, if any.
    #[serde(default, rename = "trait", skip_serializing_if = "Option::is_none")]
    pub trait_name: Option<String>,
    /// Amount the trait moved by.
    #[serde(default)]
    pub delta: f64,
}

// ---------------------------------------------------------------------------
// TrackedEntity
// ---------------------------------------------------------------------------

/// State tracked for one entity ("agent").
///
/// Every field is declared up front; a fresh entity is fully
/// default-initialized by [`TrackedEntity::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Opaque identifier, also the persistence primary key.
    pub id: String,
    /// Number of major evolutions this entity went through.
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub stagnation: f64,
    #[serde(default)]
    pub fitness: f64,
    #[serde(default)]
    pub last_evolution: Option<DateTime<Utc>>,
    /// Mutation history, oldest first. Truncated to the configured limit.
    #[serde(default)]
    pub history: Vec<MutationRecord>,
    /// Character-trait map; values live in `[0, 1]`.
    #[serde(default)]
    pub traits: BTreeMap<String, f64>,
    /// Latest observed performance signals.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackedEntity {
    /// Create a default-initialized entity.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            generation: 0,
            pressure: 0.0,
            stagnation: 0.0,
            fitness: 0.0,
            last_evolution: None,
            history: Vec::new(),
            traits: BTreeMap::new(),
            metrics: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Hours since the last evolution, or since creation when it never evolved.
    pub fn hours_since_evolution(&self, now: DateTime<Utc>) -> f64 {
        let since = self.last_evolution.unwrap_or(self.created_at);
        let minutes = (now - since).num_minutes().max(0);
        minutes as f64 / 60.0
    }

    /// Drop history entries older than `cutoff`.
    pub fn retain_history_since(&mut self, cutoff: DateTime<Utc>) {
        self.history.retain(|record| record.at >= cutoff);
    }

    /// Keep only the newest `limit` history entries.
    pub fn truncate_history(&mut self, limit: usize) {
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// The trait with the lowest value (ties resolve to the first name).
    pub fn weakest_trait(&self) -> Option<(&str, f64)> {
        self.traits
            .iter()
            .fold(None, |best: Option<(&str, f64)>, (name, value)| match best {
                Some((_, best_value)) if best_value <= *value => best,
                _ => Some((name.as_str(), *value)),
            })
    }
}

// ---------------------------------------------------------------------------
// EntityUpdate
// ---------------------------------------------------------------------------

/// Partial update returned by scorers and cycle handlers.
///
/// Merged shallowly into a [`TrackedEntity`]: each `Some` field replaces the
/// stored value, map entries overwrite per key, and `push_history` is
/// appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stagnation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evolution: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub traits: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub push_history: Vec<MutationRecord>,
}

impl EntityUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn pressure(mut self, value: f64) -> Self {
        self.pressure = Some(value);
        self
    }

    pub fn stagnation(mut self, value: f64) -> Self {
        self.stagnation = Some(value);
        self
    }

    pub fn fitness(mut self, value: f64) -> Self {
        self.fitness = Some(value);
        self
    }

    /// Merge `other` on top of `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: EntityUpdate) {
        if other.generation.is_some() {
            self.generation = other.generation;
        }
        if other.pressure.is_some() {
            self.pressure = other.pressure;
        }
        if other.stagnation.is_some() {
            self.stagnation = other.stagnation;
        }
        if other.fitness.is_some() {
            self.fitness = other.fitness;
        }
        if other.last_evolution.is_some() {
            self.last_evolution = other.last_evolution;
        }
        self.traits.extend(other.traits);
        self.metrics.extend(other.metrics);
        self.push_history.extend(other.push_history);
    }

    /// Apply this update to `entity`, clamping scores and trimming history.
    /// Non-finite metric values are dropped.
    pub fn apply_to(self, entity: &mut TrackedEntity, history_limit: usize) {
        if let Some(generation) = self.generation {
            entity.generation = generation;
        }
        if let Some(pressure) = self.pressure {
            entity.pressure = clamp_unit(pressure);
        }
        if let Some(stagnation) = self.stagnation {
            entity.stagnation = clamp_unit(stagnation);
        }
        if let Some(fitness) = self.fitness {
            entity.fitness = clamp_unit(fitness);
        }
        if let Some(at) = self.last_evolution {
            entity.last_evolution = Some(at);
        }
        for (name, value) in self.traits {
            entity.traits.insert(name, clamp_unit(value));
        }
        for (name, value) in self.metrics {
            if value.is_finite() {
                entity.metrics.insert(name, value);
            } else {
                log::warn!("Dropping non-finite metric '{}' for entity {}", name, entity.id);
            }
        }
        entity.history.extend(self.push_history);
        entity.truncate_history(history_limit);
        entity.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
