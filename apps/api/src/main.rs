mod analysis;
mod backends;
mod config;
mod db;
mod errors;
mod models;
mod personas;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::Orchestrator;
use crate::backends::BackendRegistry;
use crate::config::Config;
use crate::db::{create_pool, ensure_schema};
use crate::personas::loader::reload_system_personas;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{PgAnalysisStore, PgPersonaDirectory};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing or malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Roundtable API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    ensure_schema(&db).await?;

    // System personas; a bad directory is logged, the service still starts
    let persona_directory = PgPersonaDirectory::new(db.clone());
    if let Err(e) = reload_system_personas(&persona_directory, Path::new(&config.personas_dir)).await {
        warn!("System personas not loaded: {e:#}");
    }

    // Backend selection
    let registry = Arc::new(BackendRegistry::from_config(&config));
    let backend = registry
        .create(&config.default_backend)
        .with_context(|| format!("Registered backends: {:?}", registry.names()))?;
    if backend.is_available().await {
        info!("Evaluation backend: {}", backend.name());
    } else {
        warn!(
            "Evaluation backend '{}' is not available; jobs will fail until it is installed",
            backend.name()
        );
    }

    let store = Arc::new(PgAnalysisStore::new(db.clone()));
    let personas = Arc::new(persona_directory);
    let orchestrator = Arc::new(Orchestrator::new(
        backend,
        personas.clone(),
        store.clone(),
        config.analysis_settings(),
    ));

    // Build app state
    let state = AppState {
        db,
        config: config.clone(),
        store,
        personas,
        registry,
        orchestrator,
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
