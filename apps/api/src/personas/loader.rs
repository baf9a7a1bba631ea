use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use crate::models::persona::PersonaProfile;
use crate::store::postgres::{PgPersonaDirectory, SyncReport};

/// Reads every `*.json` persona document in `dir`, in file-name order.
///
/// Unreadable files, invalid JSON and documents without a string `id` are
/// skipped with a warning. A later file repeating an id is skipped too.
/// Fails only when the directory itself cannot be read.
pub async fn read_persona_files(dir: &Path) -> Result<Vec<PersonaProfile>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read personas directory {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seen = HashSet::new();
    let mut personas = Vec::new();
    for path in paths {
        match read_persona_file(&path).await {
            Ok(Some(persona)) => {
                if seen.insert(persona.id.clone()) {
                    personas.push(persona);
                } else {
                    warn!("Duplicate persona id '{}' in {}, skipping", persona.id, path.display());
                }
            }
            Ok(None) => warn!("Persona file {} has no string 'id', skipping", path.display()),
            Err(e) => warn!("Failed to load persona file {}: {e:#}", path.display()),
        }
    }
    Ok(personas)
}

async fn read_persona_file(path: &Path) -> Result<Option<PersonaProfile>> {
    let raw = fs::read_to_string(path).await?;
    let document: Value = serde_json::from_str(&raw).context("invalid JSON")?;
    Ok(PersonaProfile::from_document(document))
}

/// Loads the persona files in `dir` and makes them the complete set of system personas.
pub async fn reload_system_personas(directory: &PgPersonaDirectory, dir: &Path) -> Result<SyncReport> {
    let personas = read_persona_files(dir).await?;
    let report = directory.sync_system_personas(&personas).await?;
    info!(
        "System personas reloaded from {}: {} loaded, {} removed",
        dir.display(),
        report.loaded,
        report.removed
    );
    Ok(report)
}
