//! Collaborator seams the analysis engine reads and writes through.
//!
//! Writes are assumed durable and immediately visible to later reads.
//! `AppState` carries `Arc<dyn AnalysisStore>` / `Arc<dyn PersonaDirectory>`.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::job::{EvaluationUnit, Job, JobStatus, UnitUpdate};
use crate::models::persona::{PersonaChanges, PersonaProfile};

pub mod postgres;

pub use postgres::{PgAnalysisStore, PgPersonaDirectory};

/// Fields needed to register an uploaded document.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub file_name: String,
    pub document_text: String,
    pub persona_ids: Vec<String>,
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Inserts a job in `uploaded` status.
    async fn create_job(&self, job: NewJob) -> Result<Job>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>>;

    async fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Deletes the job and, by cascade, its units. Returns false if it did not exist.
    async fn delete_job(&self, job_id: Uuid) -> Result<bool>;

    /// Replaces the job's unit set with one `pending` unit per persona, in order.
    async fn create_units(&self, job_id: Uuid, persona_ids: &[String]) -> Result<Vec<EvaluationUnit>>;

    /// `Running` clears result, error and `completed_at`; terminal updates stamp `completed_at`.
    async fn set_unit_status(&self, job_id: Uuid, persona_id: &str, update: UnitUpdate) -> Result<()>;

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<()>;

    async fn get_unit(&self, job_id: Uuid, persona_id: &str) -> Result<Option<EvaluationUnit>>;

    /// Units in creation order.
    async fn get_units_for_job(&self, job_id: Uuid) -> Result<Vec<EvaluationUnit>>;
}

#[async_trait]
pub trait PersonaDirectory: Send + Sync {
    async fn resolve(&self, persona_id: &str) -> Result<Option<PersonaProfile>>;

    async fn list(&self) -> Result<Vec<PersonaProfile>>;

    /// Inserts a custom (non-system) persona. Returns `None` when the id is taken.
    async fn create(&self, persona: PersonaProfile) -> Result<Option<PersonaProfile>>;

    /// Replaces the persona's document. Returns `None` when it does not exist.
    async fn update(&self, persona_id: &str, changes: PersonaChanges) -> Result<Option<PersonaProfile>>;

    /// Units already referencing the persona keep its id. Returns false if it did not exist.
    async fn delete(&self, persona_id: &str) -> Result<bool>;
}
