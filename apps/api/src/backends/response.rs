//! Recovering an `EvaluationResult` from raw CLI output.
//!
//! Order of attempts:
//! 1. the whole output as JSON
//! 2. the first fenced block (```json ... ``` or ``` ... ```)
//!
//! A JSON object that is a CLI envelope (`{"type": "result", "result": "<text>"}`)
//! is unwrapped and its text goes through the same two steps.

use serde_json::Value;

use crate::backends::BackendError;
use crate::models::evaluation::EvaluationResult;

/// Parses and validates backend output.
pub fn parse_evaluation(raw: &str) -> Result<EvaluationResult, BackendError> {
    let value = extract_json(raw)
        .ok_or_else(|| BackendError::Parse(format!("no JSON payload in output: {}", preview(raw))))?;

    let value = match unwrap_envelope(&value) {
        Some(inner) => extract_json(inner).ok_or_else(|| {
            BackendError::Parse(format!("no JSON payload in envelope result: {}", preview(inner)))
        })?,
        None => value,
    };

    let result: EvaluationResult = serde_json::from_value(value)
        .map_err(|e| BackendError::Parse(format!("response does not match evaluation shape: {e}")))?;

    result.validate().map_err(BackendError::Parse)?;

    Ok(result)
}

fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let block = extract_fenced_block(text)?;
    serde_json::from_str(block).ok()
}

/// Returns the body of the first ```-fenced block, with an optional `json` tag stripped.
fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_open = &text[start + 3..];
    let after_tag = after_open.strip_prefix("json").unwrap_or(after_open);
    let end = after_tag.find("```")?;
    Some(after_tag[..end].trim())
}

/// The CLI's `--output-format json` envelope carries the model text in `result`.
fn unwrap_envelope(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    if object.contains_key("dimension_scores") {
        return None;
    }
    object.get("result")?.as_str()
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    let shown: String = trimmed.chars().take(120).collect();
    if shown.len() < trimmed.len() {
        format!("{shown}...")
    } else {
        shown
    }
}
