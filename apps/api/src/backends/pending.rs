//! CLI engines that are registered and checked for availability but cannot evaluate yet
//! (`codex`, `opencode`). Selecting one is valid; every evaluation fails
//! with `NotImplemented`, which is never retried.

use async_trait::async_trait;

use crate::backends::process::check_version;
use crate::backends::{BackendError, EvaluationBackend};
use crate::models::evaluation::EvaluationResult;
use crate::models::persona::PersonaProfile;

#[derive(Debug, Clone)]
pub struct PendingCliBackend {
    name: String,
    binary: String,
}

impl PendingCliBackend {
    pub fn new(name: impl Into<String>, binary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl EvaluationBackend for PendingCliBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        check_version(&self.name, &self.binary).await
    }

    async fn evaluate(
        &self,
        _persona: &PersonaProfile,
        _document_text: &str,
    ) -> Result<EvaluationResult, BackendError> {
        Err(BackendError::NotImplemented(self.name.clone()))
    }
}
