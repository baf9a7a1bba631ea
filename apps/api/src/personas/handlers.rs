//! Axum route handlers for the Personas API.

use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use crate::errors::AppError;
use crate::models::persona::{PersonaChanges, PersonaProfile};
use crate::personas::loader::reload_system_personas;
use crate::state::AppState;
use crate::store::postgres::{PgPersonaDirectory, SyncReport};

/// GET /api/v1/personas
pub async fn handle_list_personas(
    State(state): State<AppState>,
) -> Result<Json<Vec<PersonaProfile>>, AppError> {
    Ok(Json(state.personas.list().await?))
}

/// GET /api/v1/personas/:id
pub async fn handle_get_persona(
    State(state): State<AppState>,
    Path(persona_id): Path<String>,
) -> Result<Json<PersonaProfile>, AppError> {
    state
        .personas
        .resolve(&persona_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Persona '{persona_id}' not found")))
}

/// POST /api/v1/personas
///
/// Creates a custom persona from a raw persona document.
pub async fn handle_create_persona(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Result<(StatusCode, Json<PersonaProfile>), AppError> {
    let persona = PersonaProfile::custom_from_document(document).map_err(AppError::Validation)?;
    let persona_id = persona.id.clone();

    match state.personas.create(persona).await? {
        Some(created) => Ok((StatusCode::CREATED, Json(created))),
        None => Err(AppError::Conflict(format!(
            "Persona with id '{persona_id}' already exists"
        ))),
    }
}

/// PUT /api/v1/personas/:id
///
/// Replaces the persona document. Omitted `name`/`role` keep their stored values.
pub async fn handle_update_persona(
    State(state): State<AppState>,
    Path(persona_id): Path<String>,
    Json(document): Json<Value>,
) -> Result<Json<PersonaProfile>, AppError> {
    let changes = PersonaChanges::from_document(&persona_id, document).map_err(AppError::Validation)?;

    state
        .personas
        .update(&persona_id, changes)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Persona '{persona_id}' not found")))
}

/// DELETE /api/v1/personas/:id
///
/// Existing units keep the persona id; retrying one afterwards fails with 404.
pub async fn handle_delete_persona(
    State(state): State<AppState>,
    Path(persona_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.personas.delete(&persona_id).await? {
        tracing::info!("Persona {persona_id} deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Persona '{persona_id}' not found")))
    }
}

/// POST /api/v1/admin/personas/reload
///
/// Re-reads PERSONAS_DIR and replaces the system personas with its contents.
/// Units of existing jobs keep their persona ids even if a persona disappears.
pub async fn handle_reload_personas(
    State(state): State<AppState>,
) -> Result<Json<SyncReport>, AppError> {
    let dir = FsPath::new(&state.config.personas_dir);
    if !dir.is_dir() {
        return Err(AppError::UnprocessableEntity(format!(
            "Personas directory {} does not exist",
            dir.display()
        )));
    }

    let directory = PgPersonaDirectory::new(state.db.clone());
    let report = reload_system_personas(&directory, dir).await?;
    Ok(Json(report))
}
