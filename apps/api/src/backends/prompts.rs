// Request template for persona evaluations. Placeholders are filled by
// `build_evaluation_request`; nothing else in the crate formats requests.

use crate::models::evaluation::{RUBRIC_DIMENSIONS, TOP_ISSUE_COUNT};
use crate::models::persona::PersonaProfile;

pub const ROLE_INSTRUCTION: &str = "\
You are embodying the persona described above. You are attending a marketing review roundtable. \
Your job is to critically evaluate the following marketing content from your professional perspective. \
Be direct. Be specific. Do not soften your feedback. The team wants honest, constructive criticism \
that will make their marketing better, not validation.";

pub const EVALUATION_TEMPLATE: &str = r#"<persona>
{persona_json}
</persona>

<role_instruction>
{role_instruction}
</role_instruction>

<marketing_content>
{document}
</marketing_content>

<evaluation_framework>
Score each dimension 1-10 and provide specific commentary:
{rubric}
</evaluation_framework>

<output_format>
Respond in this exact JSON structure:
{
  "persona_role": "{persona_role}",
  "overall_score": <1-10>,
  "dimension_scores": {
{dimension_schema}
  },
  "top_3_issues": [
{issue_schema}
  ],
  "what_works_well": ["...", "..."],
  "overall_verdict": "Would I engage further based on this content? Why or why not?",
  "rewritten_headline_suggestion": "..."
}
</output_format>

Respond with ONLY the JSON. No markdown code blocks, no explanations, just valid JSON."#;

/// Returns the first `limit` characters of `text` (characters, not bytes).
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Builds the full evaluation request for one persona. Deterministic: the same
/// inputs always yield the same request.
pub fn build_evaluation_request(
    persona: &PersonaProfile,
    document_text: &str,
    char_limit: usize,
) -> String {
    let persona_json =
        serde_json::to_string_pretty(&persona.profile).unwrap_or_else(|_| persona.profile.to_string());

    let rubric = RUBRIC_DIMENSIONS
        .iter()
        .enumerate()
        .map(|(i, (_, question))| format!("{}. {question}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    let dimension_schema = RUBRIC_DIMENSIONS
        .iter()
        .map(|(name, _)| format!(r#"    "{name}": {{"score": <1-10>, "commentary": "..."}}"#))
        .collect::<Vec<_>>()
        .join(",\n");

    let issue_schema = (0..TOP_ISSUE_COUNT)
        .map(|_| {
            r#"    {"issue": "...", "specific_example_from_content": "...", "suggested_rewrite": "..."}"#
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(",\n");

    // Fixed text first; user-supplied values are inserted in one pass so that
    // braces inside a profile, role or document are never treated as placeholders.
    let template = EVALUATION_TEMPLATE
        .replace("{role_instruction}", ROLE_INSTRUCTION)
        .replace("{rubric}", &rubric)
        .replace("{dimension_schema}", &dimension_schema)
        .replace("{issue_schema}", &issue_schema);

    fill_placeholders(
        &template,
        &[
            ("{persona_json}", persona_json.as_str()),
            ("{persona_role}", persona.role.as_str()),
            ("{document}", truncate_chars(document_text, char_limit)),
        ],
    )
}

/// Replaces each placeholder occurrence in `template` with its value, scanning
/// left to right. Inserted values are copied as-is and never rescanned.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let next = values
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|at| (at, *key, *value)))
            .min_by_key(|(at, _, _)| *at);

        match next {
            Some((at, key, value)) => {
                out.push_str(&rest[..at]);
                out.push_str(value);
                rest = &rest[at + key.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}
