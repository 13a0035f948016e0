//! The `/health` and `/ready` HTTP surface (spec.md §6): thin boolean
//! views over the breaker state and a fresh source/log probe, styled
//! after `ferrex-server`'s health handler in this retrieval pack.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use cdc_breaker::{BreakerState, CircuitBreaker};
use cdc_source::SourceClient;
use serde_json::{json, Value};

/// Shared state behind both endpoints.
#[derive(Clone)]
pub struct HealthState<S> {
    breaker: Arc<CircuitBreaker>,
    source: Arc<S>,
}

impl<S: SourceClient + 'static> HealthState<S> {
    /// Builds the state the health router reads from.
    pub fn new(breaker: Arc<CircuitBreaker>, source: Arc<S>) -> Self {
        Self { breaker, source }
    }
}

/// Builds the `/health` + `/ready` router.
pub fn router<S: SourceClient + 'static>(state: HealthState<S>) -> Router {
    Router::new()
        .route("/health", get(health::<S>))
        .route("/ready", get(ready::<S>))
        .with_state(state)
}

async fn health<S: SourceClient + 'static>(State(state): State<HealthState<S>>) -> (StatusCode, Json<Value>) {
    match state.breaker.state() {
        BreakerState::Open => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "breaker": "open" })),
        ),
        other => (StatusCode::OK, Json(json!({ "status": "healthy", "breaker": format!("{other:?}") }))),
    }
}

async fn ready<S: SourceClient + 'static>(State(state): State<HealthState<S>>) -> (StatusCode, Json<Value>) {
    match state.source.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not_ready", "error": err.to_string() })),
        ),
    }
}
