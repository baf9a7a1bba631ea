use std::sync::Arc;

use sqlx::PgPool;

use crate::analysis::Orchestrator;
use crate::backends::BackendRegistry;
use crate::config::Config;
use crate::store::{AnalysisStore, PersonaDirectory};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub store: Arc<dyn AnalysisStore>,
    pub personas: Arc<dyn PersonaDirectory>,
    /// Every known backend, for availability listings. Jobs run on the orchestrator's backend.
    pub registry: Arc<BackendRegistry>,
    pub orchestrator: Arc<Orchestrator>,
}
