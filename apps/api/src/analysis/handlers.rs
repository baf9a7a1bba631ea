//! Axum route handlers for the Jobs API.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{EvaluationUnit, ExecutionMode, Job, JobStatus, UnitOutcome};
use crate::state::AppState;
use crate::store::NewJob;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub file_name: String,
    pub document_text: String,
    pub persona_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartAnalysisRequest {
    /// `sequential` | `concurrent` (`parallel` accepted). Falls back to EXECUTION_MODE.
    #[serde(default)]
    pub execution_mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartAnalysisResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub execution_mode: ExecutionMode,
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct JobDetailResponse {
    #[serde(flatten)]
    pub job: Job,
    pub units: Vec<EvaluationUnit>,
    /// True while this process holds an in-flight run for the job.
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: Uuid,
    pub cancelled: bool,
}

impl CreateJobRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.file_name.trim().is_empty() {
            return Err(AppError::Validation("file_name cannot be empty".to_string()));
        }
        if self.document_text.trim().is_empty() {
            return Err(AppError::Validation("document_text cannot be empty".to_string()));
        }
        if self.persona_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(AppError::Validation(
                "persona_ids must name at least one persona".to_string(),
            ));
        }
        Ok(())
    }
}

impl StartAnalysisRequest {
    /// An empty body selects the default mode; anything else must be valid JSON.
    fn from_body(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid analysis request: {e}")))
    }

    fn mode(&self, default: ExecutionMode) -> Result<ExecutionMode, AppError> {
        match self.execution_mode.as_deref() {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|e| AppError::Validation(format!("execution_mode: {e}"))),
        }
    }
}

async fn load_job(state: &AppState, job_id: Uuid) -> Result<Job, AppError> {
    state
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {job_id} not found")))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/jobs
///
/// Registers a document for analysis. Nothing runs until `/analyze` is called.
pub async fn handle_create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    request.validate()?;

    let persona_ids = request
        .persona_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    let job = state
        .store
        .create_job(NewJob {
            file_name: request.file_name,
            document_text: request.document_text,
            persona_ids,
        })
        .await?;

    tracing::info!("Job {} created for '{}'", job.id, job.file_name);
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/v1/jobs
pub async fn handle_list_jobs(State(state): State<AppState>) -> Result<Json<Vec<Job>>, AppError> {
    Ok(Json(state.store.list_jobs().await?))
}

/// GET /api/v1/jobs/:id
///
/// The job with its units in persona order.
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobDetailResponse>, AppError> {
    let job = load_job(&state, job_id).await?;
    let units = state.store.get_units_for_job(job_id).await?;
    let running = state.orchestrator.is_running(job_id);
    Ok(Json(JobDetailResponse { job, units, running }))
}

/// POST /api/v1/jobs/:id/analyze
///
/// Starts the analysis on a background task and returns immediately.
/// Progress is observed through `GET /api/v1/jobs/:id`.
pub async fn handle_start_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartAnalysisResponse>), AppError> {
    let request = StartAnalysisRequest::from_body(&body)?;
    let mode = request.mode(state.orchestrator.default_mode())?;

    let job = load_job(&state, job_id).await?;
    if matches!(job.status, JobStatus::Analyzing | JobStatus::Completed) {
        return Err(AppError::Conflict(format!(
            "Job {job_id} is already {}",
            job.status
        )));
    }

    state.orchestrator.spawn_job(&job, mode)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartAnalysisResponse {
            job_id,
            status: JobStatus::Analyzing,
            execution_mode: mode,
            backend: state.orchestrator.backend_name().to_string(),
        }),
    ))
}

/// POST /api/v1/jobs/:id/retry/:persona_id
///
/// Re-runs a single failed unit and waits for it to finish.
pub async fn handle_retry_unit(
    State(state): State<AppState>,
    Path((job_id, persona_id)): Path<(Uuid, String)>,
) -> Result<Json<UnitOutcome>, AppError> {
    let job = load_job(&state, job_id).await?;
    let outcome = state
        .orchestrator
        .retry_unit(job.id, &persona_id, &job.document_text)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/jobs/:id/cancel
pub async fn handle_cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<CancelResponse>), AppError> {
    if !state.orchestrator.cancel_job(job_id) {
        return Err(AppError::NotFound(format!(
            "Job {job_id} has no analysis in progress"
        )));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            cancelled: true,
        }),
    ))
}

/// DELETE /api/v1/jobs/:id
///
/// Cancels any in-flight run first; units are removed by cascade.
pub async fn handle_delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.orchestrator.cancel_job(job_id);
    if state.store.delete_job(job_id).await? {
        tracing::info!("Job {job_id} deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Job {job_id} not found")))
    }
}
