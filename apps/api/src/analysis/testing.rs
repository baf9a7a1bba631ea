//! In-memory collaborators and a scripted backend for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use sqlx::postgres::PgPoolOptions;

use crate::analysis::Orchestrator;
use crate::backends::{BackendError, BackendRegistry, EvaluationBackend};
use crate::config::{AnalysisSettings, Config};
use crate::models::evaluation::{sample_result, EvaluationResult};
use crate::models::job::{EvaluationUnit, Job, JobStatus, UnitStatus, UnitUpdate};
use crate::models::persona::{PersonaChanges, PersonaProfile};
use crate::state::AppState;
use crate::store::{AnalysisStore, NewJob, PersonaDirectory};

pub fn persona(id: &str) -> PersonaProfile {
    PersonaProfile {
        id: id.to_string(),
        name: format!("Persona {id}"),
        role: id.to_uppercase(),
        profile: json!({ "id": id, "role": id.to_uppercase() }),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Backend
// ────────────────────────────────────────────────────────────────────────────

/// What the scripted backend does on one call. Personas without a script succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Succeed,
    Timeout,
    ProcessFail,
    Parse,
    Unavailable,
    /// Never returns on its own; only cancellation ends it.
    Hang,
}

#[derive(Default)]
struct ScriptState {
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    name: String,
    available: bool,
    delay: Duration,
    state: Arc<ScriptState>,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            delay: Duration::ZERO,
            state: Arc::default(),
        }
    }

    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_script(self, persona_id: &str, steps: Vec<ScriptStep>) -> Self {
        self.state
            .scripts
            .lock()
            .unwrap()
            .insert(persona_id.to_string(), steps.into());
        self
    }

    pub fn calls(&self, persona_id: &str) -> usize {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == persona_id)
            .count()
    }

    pub fn call_order(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a ScriptState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a ScriptState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvaluationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn evaluate(
        &self,
        persona: &PersonaProfile,
        _document_text: &str,
    ) -> Result<EvaluationResult, BackendError> {
        self.state.calls.lock().unwrap().push(persona.id.clone());
        let _guard = InFlight::enter(&self.state);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self
            .state
            .scripts
            .lock()
            .unwrap()
            .get_mut(&persona.id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(ScriptStep::Succeed);

        match step {
            ScriptStep::Succeed => Ok(sample_result(&persona.role)),
            ScriptStep::Timeout => Err(BackendError::Timeout(Duration::from_secs(120))),
            ScriptStep::ProcessFail => Err(BackendError::Process {
                code: Some(1),
                stderr: "overloaded".to_string(),
            }),
            ScriptStep::Parse => Err(BackendError::Parse("no JSON payload".to_string())),
            ScriptStep::Unavailable => Err(BackendError::Unavailable {
                backend: self.name.clone(),
                reason: "command not found".to_string(),
            }),
            ScriptStep::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(BackendError::Timeout(Duration::from_secs(24 * 3600)))
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    units: HashMap<Uuid, Vec<EvaluationUnit>>,
    transitions: Vec<(String, UnitStatus)>,
    job_statuses: Vec<JobStatus>,
    fail_writes: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Every `set_unit_status` for a persona, in order.
    pub fn transitions(&self, persona_id: &str) -> Vec<UnitStatus> {
        self.state
            .lock()
            .unwrap()
            .transitions
            .iter()
            .filter(|(id, _)| id == persona_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Every `set_job_status`, in order.
    pub fn job_statuses(&self) -> Vec<JobStatus> {
        self.state.lock().unwrap().job_statuses.clone()
    }

    /// Makes status writes fail, as a lost database connection would.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            file_name: job.file_name,
            document_text: job.document_text,
            persona_ids: job.persona_ids,
            status: JobStatus::Uploaded,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().unwrap().jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.state.lock().unwrap().jobs.values().cloned().collect())
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.units.remove(&job_id);
        Ok(state.jobs.remove(&job_id).is_some())
    }

    async fn create_units(&self, job_id: Uuid, persona_ids: &[String]) -> Result<Vec<EvaluationUnit>> {
        let mut state = self.state.lock().unwrap();
        if !state.jobs.contains_key(&job_id) {
            bail!("Job {job_id} does not exist");
        }
        let units: Vec<EvaluationUnit> = persona_ids
            .iter()
            .map(|persona_id| EvaluationUnit {
                job_id,
                persona_id: persona_id.clone(),
                status: UnitStatus::Pending,
                result: None,
                error: None,
                created_at: Utc::now(),
                completed_at: None,
            })
            .collect();
        state.units.insert(job_id, units.clone());
        Ok(units)
    }

    async fn set_unit_status(&self, job_id: Uuid, persona_id: &str, update: UnitUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            bail!("connection reset");
        }
        let status = update.status();
        let unit = state
            .units
            .get_mut(&job_id)
            .and_then(|units| units.iter_mut().find(|u| u.persona_id == persona_id))
            .ok_or_else(|| anyhow!("Unit ({job_id}, {persona_id}) does not exist"))?;

        unit.status = status;
        match update {
            UnitUpdate::Running => {
                unit.result = None;
                unit.error = None;
                unit.completed_at = None;
            }
            UnitUpdate::Completed(result) => {
                unit.result = Some(result);
                unit.error = None;
                unit.completed_at = Some(Utc::now());
            }
            UnitUpdate::Failed(error) => {
                unit.result = None;
                unit.error = Some(error);
                unit.completed_at = Some(Utc::now());
            }
        }
        state.transitions.push((persona_id.to_string(), status));
        Ok(())
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            bail!("connection reset");
        }
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow!("Job {job_id} does not exist"))?;
        job.status = status;
        job.updated_at = Utc::now();
        state.job_statuses.push(status);
        Ok(())
    }

    async fn get_unit(&self, job_id: Uuid, persona_id: &str) -> Result<Option<EvaluationUnit>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .get(&job_id)
            .and_then(|units| units.iter().find(|u| u.persona_id == persona_id))
            .cloned())
    }

    async fn get_units_for_job(&self, job_id: Uuid) -> Result<Vec<EvaluationUnit>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .units
            .get(&job_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Personas
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryPersonas {
    personas: Mutex<HashMap<String, PersonaProfile>>,
}

impl MemoryPersonas {
    pub fn with_ids(ids: &[&str]) -> Self {
        let directory = Self::default();
        for id in ids {
            directory
                .personas
                .lock()
                .unwrap()
                .insert(id.to_string(), persona(id));
        }
        directory
    }

    pub fn remove(&self, persona_id: &str) {
        self.personas.lock().unwrap().remove(persona_id);
    }
}

#[async_trait]
impl PersonaDirectory for MemoryPersonas {
    async fn resolve(&self, persona_id: &str) -> Result<Option<PersonaProfile>> {
        Ok(self.personas.lock().unwrap().get(persona_id).cloned())
    }

    async fn list(&self) -> Result<Vec<PersonaProfile>> {
        let mut personas: Vec<_> = self.personas.lock().unwrap().values().cloned().collect();
        personas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(personas)
    }

    async fn create(&self, persona: PersonaProfile) -> Result<Option<PersonaProfile>> {
        let mut personas = self.personas.lock().unwrap();
        if personas.contains_key(&persona.id) {
            return Ok(None);
        }
        personas.insert(persona.id.clone(), persona.clone());
        Ok(Some(persona))
    }

    async fn update(&self, persona_id: &str, changes: PersonaChanges) -> Result<Option<PersonaProfile>> {
        let mut personas = self.personas.lock().unwrap();
        Ok(personas.get_mut(persona_id).map(|persona| {
            if let Some(name) = changes.name {
                persona.name = name;
            }
            if let Some(role) = changes.role {
                persona.role = role;
            }
            persona.profile = changes.profile;
            persona.clone()
        }))
    }

    async fn delete(&self, persona_id: &str) -> Result<bool> {
        Ok(self.personas.lock().unwrap().remove(persona_id).is_some())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handler state
// ────────────────────────────────────────────────────────────────────────────

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub personas: Arc<MemoryPersonas>,
}

fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/roundtable_test".to_string(),
        port: 0,
        rust_log: "debug".to_string(),
        default_backend: "scripted".to_string(),
        ai_timeout_secs: 120,
        ai_retry_attempts: 3,
        ai_backoff_base_secs: 1,
        document_char_limit: 8000,
        max_concurrent_units: 2,
        execution_mode: Default::default(),
        personas_dir: "./personas".to_string(),
        claude_cli_path: "claude".to_string(),
        codex_cli_path: "codex".to_string(),
        opencode_cli_path: "opencode".to_string(),
    }
}

/// `AppState` over the in-memory collaborators. The pool is lazy and never
/// connects, so only handlers that stay off `state.db` can be driven with it.
pub fn test_app(backend: ScriptedBackend, persona_ids: &[&str]) -> TestApp {
    let config = test_config();
    let db = PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .unwrap();
    let store = Arc::new(MemoryStore::default());
    let personas = Arc::new(MemoryPersonas::with_ids(persona_ids));
    let registry_backend = backend.clone();
    let registry = BackendRegistry::new(AnalysisSettings::default())
        .register("scripted", move |_| Arc::new(registry_backend.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(backend),
        personas.clone(),
        store.clone(),
        config.analysis_settings(),
    ));

    TestApp {
        state: AppState {
            db,
            config,
            store: store.clone(),
            personas: personas.clone(),
            registry: Arc::new(registry),
            orchestrator,
        },
        store,
        personas,
    }
}
