use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Number of ranked issues every evaluation must carry.
pub const TOP_ISSUE_COUNT: usize = 3;

/// The six rubric dimensions every request asks the backend to score.
pub const RUBRIC_DIMENSIONS: [(&str, &str); 6] = [
    (
        "relevance",
        "Relevance to my role: Does this speak to my actual priorities and pain points?",
    ),
    (
        "technical_credibility",
        "Technical credibility: Is it accurate? Does it avoid buzzword-stuffing?",
    ),
    (
        "differentiation",
        "Differentiation: Can I tell how this is different from competitors?",
    ),
    (
        "actionability",
        "Actionability: Do I know what to do next after reading this?",
    ),
    (
        "trust_signals",
        "Trust signals: Does this build or erode my trust? Why?",
    ),
    (
        "language_fit",
        "Language fit: Does this sound like it was written by someone who understands my world?",
    ),
];

/// One persona's structured verdict on a document.
///
/// Deserialization accepts both these field names and the keys the request
/// template asks the backend to emit (`top_3_issues`, `what_works_well`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub persona_role: String,
    pub overall_score: f64,
    pub dimension_scores: BTreeMap<String, DimensionScore>,
    #[serde(alias = "top_3_issues")]
    pub top_issues: Vec<TopIssue>,
    #[serde(alias = "what_works_well", default)]
    pub strengths: Vec<String>,
    #[serde(alias = "overall_verdict")]
    pub verdict: String,
    #[serde(alias = "rewritten_headline_suggestion")]
    pub headline_suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionScore {
    pub score: i64, // 1 – 10
    pub commentary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopIssue {
    pub issue: String,
    #[serde(alias = "specific_example_from_content")]
    pub example: String,
    pub suggested_rewrite: String,
}

impl EvaluationResult {
    /// Checks shape only: scores in range and exactly three ranked issues.
    /// Content quality is never judged here.
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension_scores.is_empty() {
            return Err("dimension_scores is empty".to_string());
        }

        for (dimension, score) in &self.dimension_scores {
            if !(1..=10).contains(&score.score) {
                return Err(format!(
                    "dimension '{dimension}' has score {} outside 1-10",
                    score.score
                ));
            }
        }

        if self.top_issues.len() != TOP_ISSUE_COUNT {
            return Err(format!(
                "expected {TOP_ISSUE_COUNT} top issues, got {}",
                self.top_issues.len()
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_result(role: &str) -> EvaluationResult {
    let dimension_scores = RUBRIC_DIMENSIONS
        .iter()
        .map(|(name, _)| {
            (
                name.to_string(),
                DimensionScore {
                    score: 6,
                    commentary: format!("{name} is acceptable"),
                },
            )
        })
        .collect();

    EvaluationResult {
        persona_role: role.to_string(),
        overall_score: 6.0,
        dimension_scores,
        top_issues: (1..=TOP_ISSUE_COUNT)
            .map(|i| TopIssue {
                issue: format!("Issue {i}"),
                example: format!("Example {i}"),
                suggested_rewrite: format!("Rewrite {i}"),
            })
            .collect(),
        strengths: vec!["Clear headline".to_string()],
        verdict: "Would read further".to_string(),
        headline_suggestion: "Ship faster with fewer incidents".to_string(),
    }
}
