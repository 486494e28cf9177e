//! Wide-row representation of an entity: one JSON column per state group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entity::TrackedEntity;
use crate::error::StoreError;

/// Scalar fields grouped into the `state` column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateGroup {
    #[serde(default)]
    generation: u64,
    #[serde(default)]
    pressure: f64,
    #[serde(default)]
    stagnation: f64,
    #[serde(default)]
    fitness: f64,
    #[serde(default)]
    last_evolution: Option<DateTime<Utc>>,
}

/// One row of `evolution_entities`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub id: String,
    pub state: Value,
    pub traits: Value,
    pub metrics: Value,
    pub history: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRow {
    pub fn from_entity(entity: &TrackedEntity) -> Result<Self, StoreError> {
        Ok(Self {
            id: entity.id.clone(),
            state: json!({
                "generation": entity.generation,
                "pressure": entity.pressure,
                "stagnation": entity.stagnation,
                "fitness": entity.fitness,
                "last_evolution": entity.last_evolution,
            }),
            traits: serde_json::to_value(&entity.traits)?,
            metrics: serde_json::to_value(&entity.metrics)?,
            history: serde_json::to_value(&entity.history)?,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        })
    }

    pub fn into_entity(self) -> Result<TrackedEntity, StoreError> {
        let id = self.id;
        let corrupt = |column: &str, e: serde_json::Error| StoreError::Corrupt {
            id: id.clone(),
            message: format!("{column}: {e}"),
        };
        let state: StateGroup = decode_or_default(self.state).map_err(|e| corrupt("state", e))?;
        let traits = decode_or_default(self.traits).map_err(|e| corrupt("traits", e))?;
        let metrics = decode_or_default(self.metrics).map_err(|e| corrupt("metrics", e))?;
        let history = decode_or_default(self.history).map_err(|e| corrupt("history", e))?;

        Ok(TrackedEntity {
            id,
            generation: state.generation,
            pressure: state.pressure,
            stagnation: state.stagnation,
            fitness: state.fitness,
            last_evolution: state.last_evolution,
            history,
            traits,
            metrics,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// `null` columns decode to the type's default.
fn decode_or_default<T>(value: Value) -> Result<T, serde_json::Error>
where
    T: serde::de::DeserializeOwned + Default,
{
    if value.is_null() {
        Ok(T::default())
    } else {
        serde_json::from_value(value)
    }
}

/// Parse an RFC 3339 timestamp column.
pub(crate) fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: format!("timestamp '{raw}': {e}"),
        })
}
