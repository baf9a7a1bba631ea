//! Claude CLI adapter. Runs `claude -p "<request>" --output-format json` headless.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backends::process::{check_version, run_bounded};
use crate::backends::prompts::build_evaluation_request;
use crate::backends::response::parse_evaluation;
use crate::backends::{BackendError, EvaluationBackend};
use crate::config::AnalysisSettings;
use crate::models::evaluation::EvaluationResult;
use crate::models::persona::PersonaProfile;

const CLAUDE_BIN: &str = "claude";
const BACKEND_NAME: &str = "claude";

#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    binary: String,
    timeout: Duration,
    document_char_limit: usize,
}

impl ClaudeCliBackend {
    pub fn new(settings: &AnalysisSettings) -> Self {
        Self {
            binary: CLAUDE_BIN.to_string(),
            timeout: settings.timeout,
            document_char_limit: settings.document_char_limit,
        }
    }

    /// Uses a specific binary path instead of `claude` from the PATH.
    pub fn with_binary(mut self, path: impl Into<String>) -> Self {
        self.binary = path.into();
        self
    }
}

#[async_trait]
impl EvaluationBackend for ClaudeCliBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn is_available(&self) -> bool {
        check_version(BACKEND_NAME, &self.binary).await
    }

    async fn evaluate(
        &self,
        persona: &PersonaProfile,
        document_text: &str,
    ) -> Result<EvaluationResult, BackendError> {
        let request = build_evaluation_request(persona, document_text, self.document_char_limit);
        debug!(
            "Evaluating as persona {} ({} request chars)",
            persona.id,
            request.chars().count()
        );

        let output = run_bounded(
            BACKEND_NAME,
            &self.binary,
            &["-p", &request, "--output-format", "json"],
            self.timeout,
        )
        .await?;

        parse_evaluation(&output.stdout).inspect_err(|e| {
            // stderr is only interesting when the output could not be used
            if !output.stderr.trim().is_empty() {
                warn!("Claude CLI stderr for persona {}: {}", persona.id, output.stderr.trim());
            }
            warn!("Unparseable Claude CLI output for persona {}: {e}", persona.id);
        })
    }
}
