//! Leaf scoring strategies.
//!
//! A leaf node delegates to one of three scorer variants: an external
//! script run in a subprocess, a dynamically executed function, or an
//! LLM judgment. Every variant produces a `(score, reason)` pair from
//! a context mapping, with the score in [0, 1].

pub mod function;
pub mod llm;
pub mod script;

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::llm::CompletionClient;
use crate::utilities::errors::{ScoringError, StructuralError};

pub use function::FunctionScorer;
pub use llm::LlmScorer;
pub use script::ScriptScorer;

/// Context data handed to every scorer call.
pub type ScoringContext = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// LeafScorer
// ---------------------------------------------------------------------------

/// Polymorphic leaf scorer.
///
/// Serializes to a tagged mapping `{"type": ..., ...fields}`. An
/// unrecognized tag is a fatal `StructuralError` at deserialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LeafScorer {
    /// Executes a script in a subprocess.
    Script(ScriptScorer),
    /// Executes caller-supplied function source in an isolated process.
    Function(FunctionScorer),
    /// Asks an LLM to judge the criterion.
    Llm(LlmScorer),
}

impl LeafScorer {
    /// Compute the score and justification for this leaf.
    ///
    /// The completion client is used only by the LLM variant; script
    /// and function scorers ignore it.
    pub fn score(
        &self,
        context: &ScoringContext,
        client: &dyn CompletionClient,
    ) -> Result<(f64, String), ScoringError> {
        match self {
            LeafScorer::Script(scorer) => scorer.score(context),
            LeafScorer::Function(scorer) => scorer.score(context),
            LeafScorer::Llm(scorer) => scorer.score(context, client),
        }
    }

    /// The serialized tag for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            LeafScorer::Script(_) => "script",
            LeafScorer::Function(_) => "function",
            LeafScorer::Llm(_) => "llm",
        }
    }

    /// Decode a scorer from its tagged mapping.
    pub fn from_value(value: &Value) -> Result<Self, StructuralError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("<missing>");

        match tag {
            "script" => Ok(LeafScorer::Script(serde_json::from_value(value.clone())?)),
            "function" => Ok(LeafScorer::Function(serde_json::from_value(value.clone())?)),
            "llm" => Ok(LeafScorer::Llm(serde_json::from_value(value.clone())?)),
            other => Err(StructuralError::UnknownScorerType {
                tag: other.to_string(),
            }),
        }
    }
}

impl<'de> Deserialize<'de> for LeafScorer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        LeafScorer::from_value(&value).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Reject scores outside [0, 1].
pub(crate) fn validate_score_range(value: f64) -> Result<f64, ScoringError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ScoringError::OutOfRange { value })
    }
}

/// Run an interpreter on a script file, piping `stdin_data` to its
/// standard input and capturing its output.
///
/// With a timeout the child is killed when the deadline passes
/// (`kill_on_drop`); without one the call blocks until the child
/// exits.
pub(crate) async fn run_interpreter(
    program: &str,
    script_path: &Path,
    stdin_data: &str,
    timeout: Option<Duration>,
) -> Result<std::process::Output, ScoringError> {
    let mut command = Command::new(program);
    command
        .arg(script_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;

    // Feed stdin from a task so a context larger than the pipe buffer
    // cannot stall this call (and the timeout) on a child that is not
    // reading yet. A write error means the child exited early; its
    // status and stderr carry the diagnosis.
    if let Some(mut stdin) = child.stdin.take() {
        let data = stdin_data.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&data).await {
                log::debug!("stdin write to scorer subprocess failed: {e}");
            }
            // Closing stdin lets the child's read return.
            drop(stdin);
        });
    }

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(ScoringError::Timeout {
                timeout_secs: limit.as_secs(),
            }),
        },
        None => Ok(child.wait_with_output().await?),
    }
}

/// Parse exactly one floating-point score off captured stdout.
pub(crate) fn parse_score_output(stdout: &[u8]) -> Result<f64, ScoringError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| ScoringError::InvalidOutput {
            output: trimmed.to_string(),
        })?;
    validate_score_range(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_round_trip() {
        let scorer = LeafScorer::Script(ScriptScorer::new("print(0.5)", "python", 10));
        let value = serde_json::to_value(&scorer).unwrap();

        assert_eq!(value["type"], "script");
        assert_eq!(value["script_language"], "python");

        let restored = LeafScorer::from_value(&value).unwrap();
        assert_eq!(restored, scorer);
    }

    #[test]
    fn test_unknown_tag_is_structural_error() {
        let value = json!({"type": "oracle", "question": "?"});
        let err = LeafScorer::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("unsupported scorer type: oracle"));
    }

    #[test]
    fn test_missing_tag_is_structural_error() {
        let value = json!({"script_content": "print(1)"});
        assert!(LeafScorer::from_value(&value).is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let value = json!({"type": "script", "script_content": "print(1)"});
        let scorer: LeafScorer = serde_json::from_value(value).unwrap();

        match scorer {
            LeafScorer::Script(s) => {
                assert_eq!(s.script_language, "python");
                assert_eq!(s.timeout, 30);
            }
            other => panic!("expected script scorer, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_score_range() {
        assert_eq!(validate_score_range(0.0).unwrap(), 0.0);
        assert_eq!(validate_score_range(1.0).unwrap(), 1.0);
        assert!(validate_score_range(1.5).is_err());
        assert!(validate_score_range(-0.1).is_err());
    }

    #[test]
    fn test_parse_score_output() {
        assert_eq!(parse_score_output(b"0.7\n").unwrap(), 0.7);
        assert!(matches!(
            parse_score_output(b"1.5"),
            Err(ScoringError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_score_output(b"not a number"),
            Err(ScoringError::InvalidOutput { .. })
        ));
    }
}
