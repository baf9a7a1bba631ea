//! Job orchestration: resolves personas, creates units, runs them with the
//! chosen execution strategy and folds their outcomes into the job status.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::aggregate::aggregate_job_status;
use crate::analysis::executor::UnitExecutor;
use crate::analysis::AnalysisError;
use crate::backends::{BackendError, EvaluationBackend};
use crate::config::AnalysisSettings;
use crate::models::job::{ExecutionMode, Job, JobOutcome, JobStatus, UnitOutcome, UnitStatus};
use crate::models::persona::PersonaProfile;
use crate::store::{AnalysisStore, PersonaDirectory};

type RunningJobs = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

pub struct Orchestrator {
    backend: Arc<dyn EvaluationBackend>,
    personas: Arc<dyn PersonaDirectory>,
    store: Arc<dyn AnalysisStore>,
    executor: UnitExecutor,
    settings: AnalysisSettings,
    running: RunningJobs,
    // Serializes job-status aggregation so near-simultaneous finishes cannot lose an update.
    aggregation: tokio::sync::Mutex<()>,
}

/// Unregisters a job's cancellation token when its run ends, however it ends.
struct RunGuard {
    running: RunningJobs,
    job_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn EvaluationBackend>,
        personas: Arc<dyn PersonaDirectory>,
        store: Arc<dyn AnalysisStore>,
        settings: AnalysisSettings,
    ) -> Self {
        let executor = UnitExecutor::new(backend.clone(), store.clone(), settings.retry.clone());
        Self {
            backend,
            personas,
            store,
            executor,
            settings,
            running: Arc::default(),
            aggregation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn default_mode(&self) -> ExecutionMode {
        self.settings.default_mode
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&job_id)
    }

    /// Signals the job's in-flight run to stop. Returns false when nothing was running.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(&job_id) {
            Some(token) => {
                info!("Job {job_id}: cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn register(&self, job_id: Uuid) -> Result<(CancellationToken, RunGuard), AnalysisError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.contains_key(&job_id) {
            return Err(AnalysisError::AlreadyRunning(job_id));
        }
        let token = CancellationToken::new();
        running.insert(job_id, token.clone());
        let guard = RunGuard {
            running: self.running.clone(),
            job_id,
        };
        Ok((token, guard))
    }

    /// Runs every selected persona against the document and returns once the
    /// job status has been aggregated and persisted.
    ///
    /// Only job-level conditions are errors; per-persona failures are recorded
    /// on the units and reported in the outcome. Handlers go through `spawn_job`.
    #[cfg(test)]
    pub async fn run_job(
        &self,
        job_id: Uuid,
        document_text: &str,
        persona_ids: &[String],
        mode: ExecutionMode,
    ) -> Result<JobOutcome, AnalysisError> {
        let (token, _guard) = self.register(job_id)?;
        self.execute(job_id, document_text, persona_ids, mode, &token)
            .await
    }

    /// Runs the job on a background task. The job is registered before this
    /// returns, so a second call for the same job fails with `AlreadyRunning`.
    pub fn spawn_job(
        self: &Arc<Self>,
        job: &Job,
        mode: ExecutionMode,
    ) -> Result<JoinHandle<Result<JobOutcome, AnalysisError>>, AnalysisError> {
        let (token, guard) = self.register(job.id)?;
        let this = self.clone();
        let job_id = job.id;
        let document_text = job.document_text.clone();
        let persona_ids = job.persona_ids.clone();

        Ok(tokio::spawn(async move {
            let _guard = guard;
            let result = this
                .execute(job_id, &document_text, &persona_ids, mode, &token)
                .await;
            if let Err(e) = &result {
                error!("Job {job_id}: analysis failed: {e:#}");
            }
            result
        }))
    }

    async fn execute(
        &self,
        job_id: Uuid,
        document_text: &str,
        persona_ids: &[String],
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, AnalysisError> {
        if self.store.get_job(job_id).await?.is_none() {
            return Err(AnalysisError::JobNotFound(job_id));
        }

        let personas = self.resolve_personas(persona_ids).await?;
        if personas.is_empty() {
            warn!("Job {job_id}: no valid personas among {persona_ids:?}");
            self.store.set_job_status(job_id, JobStatus::Failed).await?;
            return Err(AnalysisError::NoValidPersonas);
        }

        let ids: Vec<String> = personas.iter().map(|p| p.id.clone()).collect();
        self.store.create_units(job_id, &ids).await?;
        self.store.set_job_status(job_id, JobStatus::Analyzing).await?;
        info!(
            "Job {job_id}: analyzing with {} personas on backend '{}' ({})",
            personas.len(),
            self.backend.name(),
            mode.as_str()
        );

        let units = if self.backend.is_available().await {
            self.run_units(job_id, personas, document_text, mode, cancel)
                .await
        } else {
            warn!("Job {job_id}: backend '{}' is unavailable", self.backend.name());
            let mut units = Vec::with_capacity(personas.len());
            for persona in &personas {
                let error = BackendError::Unavailable {
                    backend: self.backend.name().to_string(),
                    reason: "availability check failed".to_string(),
                };
                units.push(self.executor.fail(job_id, persona, error).await);
            }
            units
        };

        let status = {
            let _lock = self.aggregation.lock().await;
            let status = aggregate_job_status(units.iter().map(|u| u.status))
                .unwrap_or(JobStatus::Failed);
            self.store.set_job_status(job_id, status).await?;
            status
        };

        let completed = units
            .iter()
            .filter(|u| u.status == UnitStatus::Completed)
            .count();
        let failed = units.len() - completed;
        info!("Job {job_id}: finished as {status} ({completed} completed, {failed} failed)");

        Ok(JobOutcome {
            job_id,
            status,
            total_personas: units.len(),
            completed,
            failed,
            units,
        })
    }

    /// Resolves ids in order, dropping duplicates and ids the directory does not know.
    async fn resolve_personas(&self, persona_ids: &[String]) -> Result<Vec<PersonaProfile>, AnalysisError> {
        let mut seen = HashSet::new();
        let mut personas = Vec::new();
        for id in persona_ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match self.personas.resolve(id).await? {
                Some(persona) => personas.push(persona),
                None => warn!("Persona '{id}' not found, skipping"),
            }
        }
        Ok(personas)
    }

    /// Runs the units with the given strategy. Outcomes come back in persona order
    /// either way.
    async fn run_units(
        &self,
        job_id: Uuid,
        personas: Vec<PersonaProfile>,
        document_text: &str,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> Vec<UnitOutcome> {
        match mode {
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(personas.len());
                for persona in &personas {
                    outcomes.push(
                        self.executor
                            .run_unit(job_id, persona, document_text, cancel)
                            .await,
                    );
                }
                outcomes
            }
            ExecutionMode::Concurrent => {
                self.run_concurrent(job_id, personas, document_text, cancel)
                    .await
            }
        }
    }

    async fn run_concurrent(
        &self,
        job_id: Uuid,
        personas: Vec<PersonaProfile>,
        document_text: &str,
        cancel: &CancellationToken,
    ) -> Vec<UnitOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_units.max(1)));
        let document_text: Arc<str> = Arc::from(document_text);

        let mut handles = Vec::with_capacity(personas.len());
        for persona in personas {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let document_text = document_text.clone();
            let cancel = cancel.clone();
            let task_persona = persona.clone();

            let handle = tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                executor
                    .run_unit(job_id, &task_persona, &document_text, &cancel)
                    .await
            });
            handles.push((persona, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (persona, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Job {job_id}: task for persona {} aborted: {e}", persona.id);
                    let error = BackendError::Process {
                        code: None,
                        stderr: format!("evaluation task aborted: {e}"),
                    };
                    outcomes.push(self.executor.fail(job_id, &persona, error).await);
                }
            }
        }
        outcomes
    }

    /// Re-runs one failed unit and re-aggregates the job over its full unit set.
    ///
    /// Holds the job's run registration while it works, so it cannot overlap a
    /// full run or another retry of the same job, and `cancel_job` applies to it.
    pub async fn retry_unit(
        &self,
        job_id: Uuid,
        persona_id: &str,
        document_text: &str,
    ) -> Result<UnitOutcome, AnalysisError> {
        let (token, _guard) = self.register(job_id)?;

        if self.store.get_job(job_id).await?.is_none() {
            return Err(AnalysisError::JobNotFound(job_id));
        }
        let unit = self
            .store
            .get_unit(job_id, persona_id)
            .await?
            .ok_or_else(|| AnalysisError::UnitNotFound {
                job_id,
                persona_id: persona_id.to_string(),
            })?;
        if unit.status != UnitStatus::Failed {
            return Err(AnalysisError::InvalidUnitState {
                persona_id: persona_id.to_string(),
                status: unit.status,
            });
        }
        let persona = self
            .personas
            .resolve(persona_id)
            .await?
            .ok_or_else(|| AnalysisError::PersonaNotFound(persona_id.to_string()))?;

        info!("Job {job_id}: retrying persona {persona_id}");
        let outcome = self
            .executor
            .run_unit(job_id, &persona, document_text, &token)
            .await;
        self.recompute_job_status(job_id).await?;
        Ok(outcome)
    }

    /// Re-derives the job status from the stored units and persists it.
    /// Leaves the job untouched while any unit is still pending or running.
    pub async fn recompute_job_status(&self, job_id: Uuid) -> Result<Option<JobStatus>, AnalysisError> {
        let _lock = self.aggregation.lock().await;
        let units = self.store.get_units_for_job(job_id).await?;
        let status = aggregate_job_status(units.iter().map(|u| u.status));
        if let Some(status) = status {
            self.store.set_job_status(job_id, status).await?;
            info!("Job {job_id}: status is now {status}");
        }
        Ok(status)
    }
}
