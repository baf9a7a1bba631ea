pub mod aggregate;
pub mod executor;
pub mod handlers;
pub mod orchestrator;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;
use uuid::Uuid;

use crate::models::job::UnitStatus;

pub use orchestrator::Orchestrator;

/// Job-level failures. Per-persona backend failures never surface here:
/// they are recorded on the unit instead.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("None of the selected personas could be resolved")]
    NoValidPersonas,

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Job {job_id} has no unit for persona '{persona_id}'")]
    UnitNotFound { job_id: Uuid, persona_id: String },

    #[error("Unit for persona '{persona_id}' is {status}; only failed units can be retried")]
    InvalidUnitState { persona_id: String, status: UnitStatus },

    #[error("Persona '{0}' not found")]
    PersonaNotFound(String),

    #[error("Job {0} is already being analyzed")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
