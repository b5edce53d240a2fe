//! LLM-judged leaf scorer.
//!
//! Renders a prompt template against the context, issues exactly one
//! completion request, and extracts a numeric score from the free-text
//! response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{validate_score_range, ScoringContext};
use crate::llm::{CompletionClient, OpenAiClient};
use crate::utilities::errors::ScoringError;
use crate::utilities::templates::render_template;

// Extraction patterns, tried in order: a bare decimal already in
// [0, 1], a "score: X" label, then an "X/10" rating.
static BARE_DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(0\.\d+|1\.0+|0|1)\b").unwrap());
static SCORE_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)score[:\s]*([0-9]*\.?[0-9]+)").unwrap());
static OUT_OF_TEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]*\.?[0-9]+)/10").unwrap());

/// Scorer that asks an LLM to judge the criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmScorer {
    /// Prompt template rendered against the scoring context.
    pub prompt_template: String,
    /// Optional model override for `build_client`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature for the completion request.
    #[serde(default)]
    pub temperature: f64,
    /// Optional token budget for the completion request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmScorer {
    pub fn new(prompt_template: impl Into<String>) -> Self {
        Self {
            prompt_template: prompt_template.into(),
            model: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Build a dedicated client honoring this scorer's model override.
    pub fn build_client(&self) -> OpenAiClient {
        match &self.model {
            Some(model) => OpenAiClient::new(model.clone(), None, None),
            None => OpenAiClient::from_env(),
        }
    }

    /// Render the prompt, issue one completion, and extract the score.
    ///
    /// The raw response text becomes the leaf's reason.
    pub fn score(
        &self,
        context: &ScoringContext,
        client: &dyn CompletionClient,
    ) -> Result<(f64, String), ScoringError> {
        let prompt = render_template(&self.prompt_template, context)?;

        log::debug!(
            "llm scorer requesting completion (model {}, temperature {})",
            client.model(),
            self.temperature
        );
        let response = client.complete(&prompt, self.temperature, self.max_tokens)?;

        let score = extract_score(&response)?;
        Ok((score, response))
    }
}

/// Extract a numeric score in [0, 1] from free-text LLM output.
///
/// Patterns are tried in order; the first one yielding an in-range
/// value wins. A value above 1 is divided by 10 when the response
/// carries an "/10" rating.
pub fn extract_score(response: &str) -> Result<f64, ScoringError> {
    for pattern in [&*BARE_DECIMAL_RE, &*SCORE_LABEL_RE, &*OUT_OF_TEN_RE] {
        let Some(captures) = pattern.captures(response) else {
            continue;
        };
        let Ok(mut value) = captures[1].parse::<f64>() else {
            continue;
        };

        if response.contains("/10") && value > 1.0 {
            value /= 10.0;
        }

        if validate_score_range(value).is_ok() {
            return Ok(value);
        }
    }

    Err(ScoringError::NoScoreInResponse {
        response: response.to_string(),
    })
}
