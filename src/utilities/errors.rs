//! Error types for the rubric engine.
//!
//! Each error family gets its own small enum; `RubricError` is the
//! umbrella used by file-level entry points.

use thiserror::Error;

/// Malformed tree shape, detected at construction or deserialization.
///
/// Always fatal; never auto-recovered. Recoverable shape problems
/// (e.g. a leaf whose scorer was removed after construction) are
/// reported by `RubricTree::validate` instead.
#[derive(Debug, Error)]
pub enum StructuralError {
    /// A node was given both children and a scorer.
    #[error("node '{name}' cannot have both children and a scorer")]
    BothChildrenAndScorer { name: String },

    /// A node was given neither children nor a scorer.
    #[error("node '{name}' must have either children or a scorer")]
    NeitherChildrenNorScorer { name: String },

    /// A serialized scorer carried an unknown or mismatched `type` tag.
    #[error("unsupported scorer type: {tag}")]
    UnknownScorerType { tag: String },

    /// The serialized form could not be decoded at all.
    #[error("failed to decode rubric data: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A leaf scorer failed to produce an in-range result.
///
/// Propagates and aborts the whole-tree evaluation: a missing leaf
/// score leaves every ancestor's aggregate undefined.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Script exited with a non-zero status.
    #[error("script execution failed: {stderr}")]
    ScriptFailed { stderr: String },

    /// Script exceeded its wall-clock timeout.
    #[error("script timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// No interpreter is configured for the requested language.
    #[error("unsupported script language: {language}")]
    UnsupportedLanguage { language: String },

    /// Output parsed as a number but fell outside [0, 1].
    #[error("score must be between 0 and 1, got {value}")]
    OutOfRange { value: f64 },

    /// Output could not be parsed as a floating-point score.
    #[error("invalid score output: {output}")]
    InvalidOutput { output: String },

    /// The executed function raised or returned a non-numeric value.
    #[error("function scoring failed: {message}")]
    FunctionFailed { message: String },

    /// No in-range score could be extracted from the LLM response.
    #[error("could not extract valid score from response: {response}")]
    NoScoreInResponse { response: String },

    /// Prompt template rendering failed.
    #[error("failed to render prompt template: {0}")]
    Template(#[from] tera::Error),

    /// The completion service call failed.
    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// A leaf node reached evaluation without a scorer attached.
    #[error("leaf node '{name}' has no scorer")]
    MissingScorer { name: String },

    /// Spawning or talking to the interpreter process failed.
    #[error("script process error: {0}")]
    Process(#[from] std::io::Error),
}

/// The completion service could not produce a response.
#[derive(Debug, Error)]
#[error("completion request failed: {message}")]
pub struct CompletionError {
    pub message: String,
}

impl CompletionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure while synthesizing a parent node's explanation.
///
/// Raised only during reason synthesis and caught locally: the caller
/// downgrades it to a templated fallback reason plus a warning. It
/// never aborts scoring.
#[derive(Debug, Error)]
pub enum ExplanationError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Umbrella error for tree-level entry points (file round trips).
#[derive(Debug, Error)]
pub enum RubricError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("rubric file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rubric serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
