use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::analysis::AnalysisError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AnalysisError> for AppError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::NoValidPersonas => AppError::UnprocessableEntity(e.to_string()),
            AnalysisError::JobNotFound(_)
            | AnalysisError::UnitNotFound { .. }
            | AnalysisError::PersonaNotFound(_) => AppError::NotFound(e.to_string()),
            AnalysisError::InvalidUnitState { .. } | AnalysisError::AlreadyRunning(_) => {
                AppError::Conflict(e.to_string())
            }
            AnalysisError::Store(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::UnitStatus;
    use uuid::Uuid;

    fn status_of(e: AnalysisError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn test_analysis_errors_map_to_http_status() {
        assert_eq!(
            status_of(AnalysisError::NoValidPersonas),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(AnalysisError::JobNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AnalysisError::PersonaNotFound("cto".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(AnalysisError::InvalidUnitState {
                persona_id: "cto".to_string(),
                status: UnitStatus::Completed,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AnalysisError::AlreadyRunning(Uuid::new_v4())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AnalysisError::Store(anyhow::anyhow!("pool timed out"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_store_error_body_hides_the_cause() {
        let response =
            AppError::from(AnalysisError::Store(anyhow::anyhow!("connection refused")))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(!body.to_string().contains("connection refused"));
    }

    #[test]
    fn test_invalid_state_message_names_the_status() {
        let e = AppError::from(AnalysisError::InvalidUnitState {
            persona_id: "cto".to_string(),
            status: UnitStatus::Running,
        });
        assert!(e.to_string().contains("is running"));
    }
}
