//! Drives one (job, persona) unit from `pending` to a terminal status.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::retry::{with_retry, RetryPolicy};
use crate::backends::{BackendError, EvaluationBackend};
use crate::models::job::{UnitOutcome, UnitStatus, UnitUpdate};
use crate::models::persona::PersonaProfile;
use crate::store::AnalysisStore;

#[derive(Clone)]
pub struct UnitExecutor {
    backend: Arc<dyn EvaluationBackend>,
    store: Arc<dyn AnalysisStore>,
    retry: RetryPolicy,
}

impl UnitExecutor {
    pub fn new(
        backend: Arc<dyn EvaluationBackend>,
        store: Arc<dyn AnalysisStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            store,
            retry,
        }
    }

    /// Runs the unit to completion. Never fails: every backend error ends up in
    /// the unit's `error`, and the returned status is always terminal.
    ///
    /// A token that is already cancelled fails the unit without starting it.
    pub async fn run_unit(
        &self,
        job_id: Uuid,
        persona: &PersonaProfile,
        document_text: &str,
        cancel: &CancellationToken,
    ) -> UnitOutcome {
        if cancel.is_cancelled() {
            info!("Job {job_id}: skipping persona {} (cancelled)", persona.id);
            return self.fail(job_id, persona, BackendError::Cancelled).await;
        }

        self.persist(job_id, &persona.id, UnitUpdate::Running).await;
        info!("Job {job_id}: evaluating persona {} ({})", persona.id, persona.role);

        let backend = self.backend.as_ref();
        let outcome = with_retry(&self.retry, cancel, move |attempt| {
            debug!("Job {job_id}: persona {} attempt {attempt}", persona.id);
            backend.evaluate(persona, document_text)
        })
        .await;

        match outcome {
            Ok(result) => {
                self.persist(job_id, &persona.id, UnitUpdate::Completed(result.clone()))
                    .await;
                info!(
                    "Job {job_id}: persona {} completed (overall score {})",
                    persona.id, result.overall_score
                );
                UnitOutcome {
                    persona_id: persona.id.clone(),
                    persona_name: persona.name.clone(),
                    status: UnitStatus::Completed,
                    result: Some(result),
                    error: None,
                }
            }
            Err(e) => self.fail(job_id, persona, e).await,
        }
    }

    /// Records `error` as the unit's terminal failure.
    pub async fn fail(&self, job_id: Uuid, persona: &PersonaProfile, error: BackendError) -> UnitOutcome {
        let message = error.to_string();
        warn!("Job {job_id}: persona {} failed: {message}", persona.id);
        self.persist(job_id, &persona.id, UnitUpdate::Failed(message.clone()))
            .await;
        UnitOutcome {
            persona_id: persona.id.clone(),
            persona_name: persona.name.clone(),
            status: UnitStatus::Failed,
            result: None,
            error: Some(message),
        }
    }

    // A failed write is logged, not raised: the outcome is still reported to the caller.
    async fn persist(&self, job_id: Uuid, persona_id: &str, update: UnitUpdate) {
        let status = update.status();
        if let Err(e) = self.store.set_unit_status(job_id, persona_id, update).await {
            error!("Job {job_id}: failed to persist {status} for persona {persona_id}: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::{persona, MemoryStore, ScriptStep, ScriptedBackend};
    use crate::store::{AnalysisStore, NewJob};

    async fn setup(backend: ScriptedBackend) -> (UnitExecutor, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::default());
        let job = store
            .create_job(NewJob {
                file_name: "launch.md".to_string(),
                document_text: "Launch copy".to_string(),
                persona_ids: vec!["cto".to_string()],
            })
            .await
            .unwrap();
        store.create_units(job.id, &["cto".to_string()]).await.unwrap();

        let executor = UnitExecutor::new(Arc::new(backend), store.clone(), RetryPolicy::default());
        (executor, store, job.id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_stores_result_and_completion_time() {
        let (executor, store, job_id) = setup(ScriptedBackend::new("claude")).await;

        let outcome = executor
            .run_unit(job_id, &persona("cto"), "Launch copy", &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, UnitStatus::Completed);
        let unit = store.get_unit(job_id, "cto").await.unwrap().unwrap();
        assert_eq!(unit.status, UnitStatus::Completed);
        assert!(unit.result.is_some());
        assert!(unit.error.is_none());
        assert!(unit.completed_at.is_some());
        assert_eq!(
            store.transitions("cto"),
            vec![UnitStatus::Running, UnitStatus::Completed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stores_error_without_result() {
        let backend = ScriptedBackend::new("claude").with_script("cto", vec![ScriptStep::Parse]);
        let (executor, store, job_id) = setup(backend).await;

        let outcome = executor
            .run_unit(job_id, &persona("cto"), "Launch copy", &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, UnitStatus::Failed);
        let unit = store.get_unit(job_id, "cto").await.unwrap().unwrap();
        assert_eq!(unit.status, UnitStatus::Failed);
        assert!(unit.result.is_none());
        assert!(unit.error.unwrap().contains("Could not parse"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures_before_succeeding() {
        let backend = ScriptedBackend::new("claude")
            .with_script("cto", vec![ScriptStep::Timeout, ScriptStep::ProcessFail]);
        let (executor, store, job_id) = setup(backend.clone()).await;

        let outcome = executor
            .run_unit(job_id, &persona("cto"), "Launch copy", &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, UnitStatus::Completed);
        assert_eq!(backend.calls("cto"), 3);
        let unit = store.get_unit(job_id, "cto").await.unwrap().unwrap();
        assert!(unit.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_command_fails_after_one_call() {
        let backend =
            ScriptedBackend::new("claude").with_script("cto", vec![ScriptStep::Unavailable]);
        let (executor, store, job_id) = setup(backend.clone()).await;

        let outcome = executor
            .run_unit(job_id, &persona("cto"), "Launch copy", &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, UnitStatus::Failed);
        assert_eq!(backend.calls("cto"), 1);
        let unit = store.get_unit(job_id, "cto").await.unwrap().unwrap();
        assert!(unit.error.unwrap().contains("not available"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_fails_unit_without_running_it() {
        let backend = ScriptedBackend::new("claude");
        let (executor, store, job_id) = setup(backend.clone()).await;
        let token = CancellationToken::new();
        token.cancel();

        let outcome = executor.run_unit(job_id, &persona("cto"), "Launch copy", &token).await;

        assert_eq!(outcome.status, UnitStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("Evaluation cancelled"));
        assert_eq!(backend.calls("cto"), 0);
        assert_eq!(store.transitions("cto"), vec![UnitStatus::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_does_not_escape() {
        let (executor, store, job_id) = setup(ScriptedBackend::new("claude")).await;
        store.fail_writes(true);

        let outcome = executor
            .run_unit(job_id, &persona("cto"), "Launch copy", &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, UnitStatus::Completed);
    }
}
