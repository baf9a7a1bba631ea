pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::analysis::handlers as jobs;
use crate::personas::handlers as personas;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/backends", get(health::backends_handler))
        // Personas
        .route(
            "/api/v1/personas",
            get(personas::handle_list_personas).post(personas::handle_create_persona),
        )
        .route(
            "/api/v1/personas/:id",
            get(personas::handle_get_persona)
                .put(personas::handle_update_persona)
                .delete(personas::handle_delete_persona),
        )
        .route(
            "/api/v1/admin/personas/reload",
            post(personas::handle_reload_personas),
        )
        // Jobs
        .route(
            "/api/v1/jobs",
            get(jobs::handle_list_jobs).post(jobs::handle_create_job),
        )
        .route(
            "/api/v1/jobs/:id",
            get(jobs::handle_get_job).delete(jobs::handle_delete_job),
        )
        .route("/api/v1/jobs/:id/analyze", post(jobs::handle_start_analysis))
        .route(
            "/api/v1/jobs/:id/retry/:persona_id",
            post(jobs::handle_retry_unit),
        )
        .route("/api/v1/jobs/:id/cancel", post(jobs::handle_cancel_job))
        .with_state(state)
}
