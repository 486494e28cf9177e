//! Axum route handlers for the orchestrator status server.
//!
//! # Routes
//!
//! - `GET  /health`               : liveness plus a short status summary
//! - `GET  /entities`             : every tracked entity
//! - `GET  /entities/:id`         : one entity
//! - `GET  /entities/:id/score`   : freshly computed scores
//! - `POST /entities/:id/metrics` : record observed metrics
//! - `GET  /cycles?limit=N`       : recent cycle records, newest first
//! - `POST /cycles/:name/run`     : run a cycle immediately

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cycle::{CycleRecord, CycleReport};
use crate::entity::TrackedEntity;
use crate::error::OrchestratorError;
use crate::orchestrator::EvolutionOrchestrator;
use crate::scoring::ScoreSnapshot;

/// Default and maximum page sizes for `GET /cycles`.
const DEFAULT_CYCLE_LIMIT: usize = 20;
const MAX_CYCLE_LIMIT: usize = 1_000;

type ApiError = (StatusCode, Json<Value>);

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<EvolutionOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<EvolutionOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/entities", get(list_entities_handler))
        .route("/entities/:id", get(get_entity_handler))
        .route("/entities/:id/score", get(score_handler))
        .route("/entities/:id/metrics", post(record_metrics_handler))
        .route("/cycles", get(list_cycles_handler))
        .route("/cycles/:name/run", post(run_cycle_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn not_found(what: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} '{id}' not found") })),
    )
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "evolution-orchestrator",
        "running": orchestrator.is_running(),
        "persistence": orchestrator.persistence_enabled(),
        "entities": orchestrator.registry().len(),
        "cycles": orchestrator.cycle_names(),
    }))
}

/// GET /entities
async fn list_entities_handler(State(state): State<AppState>) -> Json<Vec<TrackedEntity>> {
    Json(state.orchestrator.entities().await)
}

/// GET /entities/:id
async fn get_entity_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TrackedEntity>, ApiError> {
    state
        .orchestrator
        .entity(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found("Entity", &id))
}

/// GET /entities/:id/score
async fn score_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScoreSnapshot>, ApiError> {
    state
        .orchestrator
        .score(&id)
        .await
        .map(Json)
        .ok_or_else(|| not_found("Entity", &id))
}

/// POST /entities/:id/metrics
///
/// Body: `{ "success_rate": 0.8, "estimation_accuracy": 0.7 }`. Creates the
/// entity when it is not tracked yet.
async fn record_metrics_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(metrics): Json<BTreeMap<String, f64>>,
) -> Result<Json<TrackedEntity>, ApiError> {
    if id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Entity id must not be empty" })),
        ));
    }
    Ok(Json(state.orchestrator.observe(&id, metrics).await))
}

#[derive(Debug, Deserialize)]
struct CycleQuery {
    limit: Option<usize>,
}

/// GET /cycles?limit=N
async fn list_cycles_handler(
    State(state): State<AppState>,
    Query(query): Query<CycleQuery>,
) -> Json<Vec<CycleRecord>> {
    let limit = query.limit.unwrap_or(DEFAULT_CYCLE_LIMIT).min(MAX_CYCLE_LIMIT);
    Json(state.orchestrator.recent_cycles(limit))
}

/// POST /cycles/:name/run
async fn run_cycle_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CycleReport>, ApiError> {
    match state.orchestrator.run_cycle_now(&name).await {
        Ok(report) => Ok(Json(report)),
        Err(OrchestratorError::UnknownCycle(name)) => Err(not_found("Cycle", &name)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::OrchestratorConfig;

    fn test_state() -> AppState {
        let config = OrchestratorConfig {
            cycles: BTreeMap::new(),
            ..Default::default()
        };
        AppState::new(Arc::new(EvolutionOrchestrator::new(config, None).unwrap()))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, json) = send(app_router(test_state()), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::VERSION);
        assert_eq!(json["service"], "evolution-orchestrator");
        assert_eq!(json["running"], false);
        assert_eq!(json["entities"], 0);
    }

    #[tokio::test]
    async fn test_metrics_then_entity_and_score() {
        let state = test_state();
        let (status, json) = send(
            app_router(state.clone()),
            post_json("/entities/agent-1/metrics", json!({ "success_rate": 0.2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metrics"]["success_rate"], 0.2);

        let (status, json) = send(
            app_router(state.clone()),
            get_request("/entities/agent-1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], "agent-1");
        assert_eq!(json["generation"], 0);

        let (status, json) = send(
            app_router(state.clone()),
            get_request("/entities/agent-1/score"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["pressure"].as_f64().unwrap() > 0.0);

        let (_, json) = send(app_router(state), get_request("/entities")).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_404() {
        let state = test_state();
        let (status, json) = send(app_router(state.clone()), get_request("/entities/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("ghost"));

        let (status, _) = send(app_router(state), get_request("/entities/ghost/score")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_cycle_and_list_records() {
        let state = test_state();
        state.orchestrator.observe("a", BTreeMap::new()).await;

        let (status, json) = send(
            app_router(state.clone()),
            post_json("/cycles/major_evolution/run", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["processed"], 1);

        let (status, json) = send(app_router(state.clone()), get_request("/cycles?limit=5")).await;
        assert_eq!(status, StatusCode::OK);
        let records = json.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["cycle"], "major_evolution");

        let (status, _) = send(app_router(state), post_json("/cycles/nope/run", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
