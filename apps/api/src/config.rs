use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::analysis::retry::RetryPolicy;
use crate::models::job::ExecutionMode;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub default_backend: String,
    pub ai_timeout_secs: u64,
    pub ai_retry_attempts: u32,
    pub ai_backoff_base_secs: u64,
    pub document_char_limit: usize,
    pub max_concurrent_units: usize,
    pub execution_mode: ExecutionMode,
    pub personas_dir: String,
    pub claude_cli_path: String,
    pub codex_cli_path: String,
    pub opencode_cli_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            default_backend: env_or("DEFAULT_AI_BACKEND", "claude"),
            ai_timeout_secs: parse_env("AI_TIMEOUT_SECS", 120)?,
            ai_retry_attempts: parse_env("AI_RETRY_ATTEMPTS", 3)?,
            ai_backoff_base_secs: parse_env("AI_BACKOFF_BASE_SECS", 1)?,
            document_char_limit: parse_env("DOCUMENT_CHAR_LIMIT", 8000)?,
            max_concurrent_units: parse_env("MAX_CONCURRENT_UNITS", 2)?,
            execution_mode: parse_env("EXECUTION_MODE", ExecutionMode::Sequential)?,
            personas_dir: env_or("PERSONAS_DIR", "./personas"),
            claude_cli_path: env_or("CLAUDE_CLI_PATH", "claude"),
            codex_cli_path: env_or("CODEX_CLI_PATH", "codex"),
            opencode_cli_path: env_or("OPENCODE_CLI_PATH", "opencode"),
        })
    }

    /// The values the analysis engine consumes, detached from where they came from.
    pub fn analysis_settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            timeout: Duration::from_secs(self.ai_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.ai_retry_attempts.max(1),
                backoff_base: Duration::from_secs(self.ai_backoff_base_secs),
            },
            document_char_limit: self.document_char_limit,
            max_concurrent_units: self.max_concurrent_units.max(1),
            default_mode: self.execution_mode,
        }
    }
}

/// Explicit settings handed to the orchestrator and backend adapters at startup.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Hard wall-clock bound on a single backend invocation.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Documents are cut to this many characters before being embedded in a request.
    pub document_char_limit: usize,
    /// Width of the worker pool used by concurrent execution.
    pub max_concurrent_units: usize,
    pub default_mode: ExecutionMode,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            document_char_limit: 8000,
            max_concurrent_units: 2,
            default_mode: ExecutionMode::Sequential,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw:?}"))
}
