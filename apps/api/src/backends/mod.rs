//! Backend adapters: the only code that talks to external evaluation engines.
//!
//! Every engine is a CLI that receives one request and prints one JSON object.
//! Adapters run exactly one process per `evaluate` call; retries belong to
//! `analysis::retry`, never here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AnalysisSettings, Config};
use crate::models::evaluation::EvaluationResult;
use crate::models::persona::PersonaProfile;

pub mod claude;
pub mod pending;
pub mod process;
pub mod prompts;
pub mod response;

pub use claude::ClaudeCliBackend;
pub use pending::PendingCliBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend '{backend}' is not available: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Backend process failed (exit code {code:?}): {stderr}")]
    Process { code: Option<i32>, stderr: String },

    #[error("Could not parse backend response: {0}")]
    Parse(String),

    #[error("Backend '{0}' is not implemented yet")]
    NotImplemented(String),

    #[error("Evaluation cancelled")]
    Cancelled,

    #[error("{last} (gave up after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        last: Box<BackendError>,
    },
}

impl BackendError {
    /// Timeouts and process crashes are transient; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Timeout(_) | BackendError::Process { .. })
    }
}

/// A pluggable evaluation engine. Implement this to add a backend without
/// touching the orchestrator.
#[async_trait]
pub trait EvaluationBackend: Send + Sync {
    /// Registry name, e.g. `"claude"`.
    fn name(&self) -> &str;

    /// Checks that the external command runs. No side effects beyond running it.
    async fn is_available(&self) -> bool;

    /// Evaluates `document_text` from the persona's point of view.
    async fn evaluate(
        &self,
        persona: &PersonaProfile,
        document_text: &str,
    ) -> Result<EvaluationResult, BackendError>;
}

type BackendFactory = Box<dyn Fn(&AnalysisSettings) -> Arc<dyn EvaluationBackend> + Send + Sync>;

#[derive(Debug, Error)]
#[error("Unknown backend '{0}'")]
pub struct UnknownBackend(pub String);

/// Name → adapter constructor. Registration order is preserved for listing.
pub struct BackendRegistry {
    settings: AnalysisSettings,
    factories: Vec<(String, BackendFactory)>,
}

impl BackendRegistry {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self {
            settings,
            factories: Vec::new(),
        }
    }

    /// The three CLI engines, with binary paths taken from config.
    pub fn from_config(config: &Config) -> Self {
        let claude_path = config.claude_cli_path.clone();
        let codex_path = config.codex_cli_path.clone();
        let opencode_path = config.opencode_cli_path.clone();

        Self::new(config.analysis_settings())
            .register("claude", move |settings| {
                Arc::new(ClaudeCliBackend::new(settings).with_binary(claude_path.clone()))
            })
            .register("codex", move |_| {
                Arc::new(PendingCliBackend::new("codex", codex_path.clone()))
            })
            .register("opencode", move |_| {
                Arc::new(PendingCliBackend::new("opencode", opencode_path.clone()))
            })
    }

    pub fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(&AnalysisSettings) -> Arc<dyn EvaluationBackend> + Send + Sync + 'static,
    {
        self.factories.retain(|(existing, _)| existing != name);
        self.factories.push((name.to_string(), Box::new(factory)));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn EvaluationBackend>, UnknownBackend> {
        self.factories
            .iter()
            .find(|(registered, _)| registered == name)
            .map(|(_, factory)| factory(&self.settings))
            .ok_or_else(|| UnknownBackend(name.to_string()))
    }

    /// Names of registered backends whose availability check currently succeeds.
    pub async fn list_available(&self) -> Vec<String> {
        let mut available = Vec::new();
        for (name, factory) in &self.factories {
            if factory(&self.settings).is_available().await {
                available.push(name.clone());
            }
        }
        available
    }
}
