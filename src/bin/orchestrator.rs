//! evolution-orchestrator binary.
//!
//! Loads configuration, restores state from the configured store, runs the
//! evolution cycles and serves the status API until Ctrl-C, then stops the
//! timers and flushes once.
//!
//! # Environment Variables
//!
//! - `EVOLUTION_CONFIG`: YAML configuration file (optional)
//! - `EVOLUTION_STORE`: `memory`, `sqlite` or `postgres`
//! - `EVOLUTION_DB_PATH`: SQLite database file
//! - `DATABASE_URL`: PostgreSQL connection string
//! - `STATUS_ADDR`: status server bind address (default `0.0.0.0:$PORT`)
//! - `PORT`: status server port (default: 8080); set `STATUS_ADDR=off` to disable
//! - `RUST_LOG`: tracing filter (default: "info,evolution_orchestrator=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin evolution-orchestrator
//! # with postgres:
//! EVOLUTION_STORE=postgres cargo run --bin evolution-orchestrator --features postgres
//! ```

use std::sync::Arc;

use anyhow::Context;
use evolution_orchestrator::server::{app_router, AppState};
use evolution_orchestrator::{EvolutionOrchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,evolution_orchestrator=debug".into()),
        )
        .init();

    let mut config = match std::env::var("EVOLUTION_CONFIG") {
        Ok(path) => OrchestratorConfig::from_yaml_file(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        Err(_) => OrchestratorConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("applying environment overrides")?;

    let orchestrator = Arc::new(
        EvolutionOrchestrator::from_config(config)
            .await
            .context("building orchestrator")?,
    );
    let init = orchestrator.initialize().await.context("initializing orchestrator")?;
    if let Some(reason) = &init.degraded {
        tracing::warn!("Running without persistence: {}", reason);
    }
    tracing::info!(
        "Restored {} entities; cycles: {}",
        init.loaded,
        init.cycles.join(", ")
    );

    orchestrator.start().context("starting timers")?;

    let server = match status_addr() {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding status server to {addr}"))?;
            tracing::info!("Status server listening on {}", addr);
            let app = app_router(AppState::new(Arc::clone(&orchestrator)));
            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!("Status server failed: {}", e);
                }
            }))
        }
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    if let Some(server) = server {
        server.abort();
    }
    let flush = orchestrator.shutdown().await;
    if let Some(error) = flush.error {
        tracing::error!("Final flush failed: {}", error);
    }
    Ok(())
}

fn status_addr() -> Option<String> {
    match std::env::var("STATUS_ADDR") {
        Ok(addr) if addr.eq_ignore_ascii_case("off") => None,
        Ok(addr) => Some(addr),
        Err(_) => {
            let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
            Some(format!("0.0.0.0:{port}"))
        }
    }
}
