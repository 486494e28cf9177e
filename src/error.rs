//! Error types for the orchestrator and its storage layer.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL failure.
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// State could not be (de)serialized to JSON.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// File-system failure while preparing the database location.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded back into an entity.
    #[error("Corrupt row '{id}': {message}")]
    Corrupt { id: String, message: String },

    /// The connection lock was poisoned or the backend is unusable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// `start` was called on a scheduler that is already running.
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// A cycle name was referenced that is not registered.
    #[error("Unknown cycle: {0}")]
    UnknownCycle(String),

    /// An entity handler did not finish within the configured budget.
    #[error("Handler timed out after {0:?}")]
    HandlerTimeout(Duration),

    /// A cycle handler reported a failure for one entity.
    #[error("Handler failed: {0}")]
    Handler(String),
}

impl OrchestratorError {
    /// Shorthand for a handler failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// Result alias for orchestrator operations.
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
