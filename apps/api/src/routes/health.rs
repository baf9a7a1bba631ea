use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns a simple status object with service version.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "roundtable-api"
    }))
}

#[derive(Debug, Serialize)]
pub struct BackendsResponse {
    /// The backend jobs run on.
    pub default: String,
    pub available: Vec<String>,
}

/// GET /api/v1/backends
/// Checks every registered backend. Each check spawns the backend's CLI once.
pub async fn backends_handler(State(state): State<AppState>) -> Json<BackendsResponse> {
    Json(BackendsResponse {
        default: state.orchestrator.backend_name().to_string(),
        available: state.registry.list_available().await,
    })
}
