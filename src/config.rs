//! Orchestrator configuration.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration. Keys the orchestrator does not recognise are kept in
//! [`OrchestratorConfig::extra`] and carried through unchanged.
//!
//! # Example
//!
//! ```yaml
//! cycles:
//!   micro_evolution: { interval_ms: 3600000 }
//!   major_evolution: { interval_ms: 86400000, enabled: false }
//! thresholds:
//!   micro_pressure: 0.4
//! persistence:
//!   backend: sqlite
//!   path: data/evolution.db
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cycle::{
    EvolutionThresholds, DEFAULT_CYCLE_LOG_CAPACITY, MAJOR_EVOLUTION, MICRO_EVOLUTION,
};
use crate::entity::DEFAULT_HISTORY_LIMIT;
use crate::error::ConfigError;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::scoring::{ScorerConfig, ScoringSuite};

/// Selects the store backend.
pub const ENV_STORE: &str = "EVOLUTION_STORE";
/// Overrides the SQLite database path.
pub const ENV_DB_PATH: &str = "EVOLUTION_DB_PATH";
/// PostgreSQL connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

// ============================================================================
// Top level
// ============================================================================

/// Construction-time configuration for
/// [`EvolutionOrchestrator`](crate::orchestrator::EvolutionOrchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Timer settings per cycle name.
    #[serde(default = "default_cycles")]
    pub cycles: BTreeMap<String, CycleConfig>,
    #[serde(default)]
    pub thresholds: EvolutionThresholds,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Budget for processing one entity, lock wait included.
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Mutation records kept per entity.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// History older than this is dropped when state is loaded.
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,
    #[serde(default = "default_cycle_log_capacity")]
    pub cycle_log_capacity: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Unrecognised keys.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_cycles() -> BTreeMap<String, CycleConfig> {
    BTreeMap::from([
        (MICRO_EVOLUTION.to_string(), CycleConfig::every(Duration::from_secs(60 * 60))),
        (MAJOR_EVOLUTION.to_string(), CycleConfig::every(Duration::from_secs(24 * 60 * 60))),
    ])
}

fn default_handler_timeout_ms() -> u64 {
    30_000
}

fn default_flush_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_history_retention_days() -> u32 {
    30
}

fn default_cycle_log_capacity() -> usize {
    DEFAULT_CYCLE_LOG_CAPACITY
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cycles: default_cycles(),
            thresholds: EvolutionThresholds::default(),
            scoring: ScoringConfig::default(),
            persistence: PersistenceConfig::default(),
            handler_timeout_ms: default_handler_timeout_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            history_limit: default_history_limit(),
            history_retention_days: default_history_retention_days(),
            cycle_log_capacity: default_cycle_log_capacity(),
            event_capacity: default_event_capacity(),
            extra: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a configuration from a YAML file on disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Apply `EVOLUTION_STORE`, `EVOLUTION_DB_PATH` and `DATABASE_URL`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup` instead of the process
    /// environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_STORE) {
            self.persistence.backend = raw.parse()?;
            self.persistence.enabled = true;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.persistence.path = PathBuf::from(path);
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.persistence.database_url = Some(url);
        }
        Ok(())
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, cycle) in &self.cycles {
            if cycle.enabled && cycle.interval_ms == 0 {
                return Err(ConfigError::Invalid(format!("cycle '{name}' has a zero interval")));
            }
        }
        for (label, value) in [
            ("thresholds.micro_pressure", self.thresholds.micro_pressure),
            ("thresholds.major_stagnation", self.thresholds.major_stagnation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{label} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.thresholds.mutation_step < 0.0 {
            return Err(ConfigError::Invalid(
                "thresholds.mutation_step must not be negative".into(),
            ));
        }
        if self.handler_timeout_ms == 0 {
            return Err(ConfigError::Invalid("handler_timeout_ms must be positive".into()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("history_limit must be positive".into()));
        }
        if self.persistence.enabled {
            if self.flush_interval_ms == 0 {
                return Err(ConfigError::Invalid("flush_interval_ms must be positive".into()));
            }
            if self.persistence.backend == StoreBackend::Postgres {
                if self.persistence.database_url.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "postgres backend requires persistence.database_url or {ENV_DATABASE_URL}"
                    )));
                }
                if !cfg!(feature = "postgres") {
                    return Err(ConfigError::Invalid(
                        "postgres backend requires the `postgres` feature".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Build the scorers described by [`OrchestratorConfig::scoring`].
    pub fn scoring_suite(&self) -> ScoringSuite {
        ScoringSuite::new(
            self.scoring.pressure.clone(),
            self.scoring.stagnation.clone(),
            self.scoring.fitness.clone(),
        )
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Timer settings for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    pub interval_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl CycleConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            enabled: true,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Scorer definitions. Missing entries fall back to the built-in weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "ScorerConfig::default_pressure")]
    pub pressure: ScorerConfig,
    #[serde(default = "ScorerConfig::default_stagnation")]
    pub stagnation: ScorerConfig,
    #[serde(default = "ScorerConfig::default_fitness")]
    pub fitness: ScorerConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            pressure: ScorerConfig::default_pressure(),
            stagnation: ScorerConfig::default_stagnation(),
            fitness: ScorerConfig::default_fitness(),
        }
    }
}

/// Store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigError::Invalid(format!("unknown store backend '{other}'"))),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// When set, a store that fails to initialize aborts startup instead
    /// of disabling persistence.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/evolution.db")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            required: false,
            backend: StoreBackend::default(),
            path: default_db_path(),
            database_url: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = OrchestratorConfig::from_yaml_str("").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.cycles.len(), 2);
        assert_eq!(config.cycles[MICRO_EVOLUTION].interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = OrchestratorConfig::from_yaml_str(
            r#"
cycles:
  micro_evolution: { interval_ms: 1000 }
thresholds:
  micro_pressure: 0.45
history_limit: 10
"#,
        )
        .unwrap();
        assert_eq!(config.cycles.len(), 1);
        assert!(config.cycles[MICRO_EVOLUTION].enabled);
        assert_eq!(config.thresholds.micro_pressure, 0.45);
        assert_eq!(config.thresholds.major_stagnation, 0.6);
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.handler_timeout(), Duration::from_secs(30));
        assert_eq!(config.scoring, ScoringConfig::default());
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let config = OrchestratorConfig::from_yaml_str(
            r#"
history_limit: 5
team: platform
limits:
  burst: 3
"#,
        )
        .unwrap();
        assert_eq!(config.extra["team"], serde_json::json!("platform"));
        assert_eq!(config.extra["limits"]["burst"], serde_json::json!(3));
        assert!(!config.extra.contains_key("history_limit"));
    }

    #[test]
    fn test_custom_scorer_from_yaml() {
        let config = OrchestratorConfig::from_yaml_str(
            r#"
scoring:
  pressure:
    target: pressure
    terms:
      - signal: error_rate
        weight: 1.0
"#,
        )
        .unwrap();
        let terms = &config.scoring.pressure.terms;
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].signal, "error_rate");
        assert_eq!(config.scoring.fitness, ScorerConfig::default_fitness());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = OrchestratorConfig::default();
        let env = BTreeMap::from([
            (ENV_STORE, "sqlite"),
            (ENV_DB_PATH, "/tmp/evo.db"),
        ]);
        config
            .apply_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert!(config.persistence.enabled);
        assert_eq!(config.persistence.backend, StoreBackend::Sqlite);
        assert_eq!(config.persistence.path, PathBuf::from("/tmp/evo.db"));
        assert!(config.persistence.database_url.is_none());
    }

    #[test]
    fn test_bad_backend_override_rejected() {
        let mut config = OrchestratorConfig::default();
        let err = config
            .apply_overrides_from(|key| (key == ENV_STORE).then(|| "mongo".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("mongo"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OrchestratorConfig::default();
        config.cycles.insert("x".into(), CycleConfig { interval_ms: 0, enabled: true });
        assert!(config.validate().is_err());

        // Disabled cycles are not checked.
        config.cycles.insert("x".into(), CycleConfig { interval_ms: 0, enabled: false });
        assert!(config.validate().is_ok());

        config.thresholds.micro_pressure = 1.5;
        assert!(config.validate().is_err());
        config.thresholds.micro_pressure = 0.3;

        config.handler_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.handler_timeout_ms = 1;

        config.persistence.enabled = true;
        config.persistence.backend = StoreBackend::Postgres;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "persistence:\n  enabled: true\n  backend: sqlite\n  required: true"
        )
        .unwrap();
        let config = OrchestratorConfig::from_yaml_file(file.path()).unwrap();
        assert!(config.persistence.enabled);
        assert!(config.persistence.required);
        assert_eq!(config.persistence.backend, StoreBackend::Sqlite);

        assert!(matches!(
            OrchestratorConfig::from_yaml_file("/nonexistent/evolution.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
