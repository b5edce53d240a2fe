//! Script-based leaf scorer.
//!
//! Writes the script body to a scoped temporary file, runs the
//! matching interpreter with the JSON-encoded context on stdin, and
//! reads a single floating-point score off stdout.

use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{parse_score_output, run_interpreter, ScoringContext};
use crate::utilities::errors::ScoringError;

/// Default wall-clock timeout in seconds.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 30;

fn default_language() -> String {
    "python".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_SCRIPT_TIMEOUT_SECS
}

/// Scorer that executes a script in a subprocess.
///
/// The script receives the context mapping as JSON on stdin and must
/// print a score between 0 and 1 to stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptScorer {
    /// The script body.
    pub script_content: String,
    /// Script language: "python", "bash", "javascript", or "node".
    #[serde(default = "default_language")]
    pub script_language: String,
    /// Wall-clock timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ScriptScorer {
    pub fn new(
        script_content: impl Into<String>,
        script_language: impl Into<String>,
        timeout: u64,
    ) -> Self {
        Self {
            script_content: script_content.into(),
            script_language: script_language.into(),
            timeout,
        }
    }

    /// Create a Python scorer with the default timeout.
    pub fn python(script_content: impl Into<String>) -> Self {
        Self::new(script_content, "python", DEFAULT_SCRIPT_TIMEOUT_SECS)
    }

    /// File extension for the configured language.
    fn script_extension(&self) -> &'static str {
        match self.script_language.to_lowercase().as_str() {
            "python" => ".py",
            "bash" => ".sh",
            "javascript" | "node" => ".js",
            _ => ".txt",
        }
    }

    /// Interpreter executable for the configured language.
    fn interpreter(&self) -> Result<&'static str, ScoringError> {
        match self.script_language.to_lowercase().as_str() {
            "python" => Ok("python3"),
            "bash" => Ok("bash"),
            "javascript" | "node" => Ok("node"),
            _ => Err(ScoringError::UnsupportedLanguage {
                language: self.script_language.clone(),
            }),
        }
    }

    /// Execute the script and return its `(score, reason)` pair.
    ///
    /// The temporary script file is owned by this call and deleted on
    /// every exit path, including failure.
    pub fn score(&self, context: &ScoringContext) -> Result<(f64, String), ScoringError> {
        let interpreter = self.interpreter()?;

        let mut script_file = tempfile::Builder::new()
            .suffix(self.script_extension())
            .tempfile()?;
        script_file.write_all(self.script_content.as_bytes())?;
        script_file.flush()?;

        let context_json = serde_json::to_string(context)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        log::debug!(
            "running {} script scorer (timeout {}s)",
            self.script_language,
            self.timeout
        );

        let rt = tokio::runtime::Runtime::new()?;
        let output = rt.block_on(run_interpreter(
            interpreter,
            script_file.path(),
            &context_json,
            Some(Duration::from_secs(self.timeout)),
        ))?;

        if !output.status.success() {
            return Err(ScoringError::ScriptFailed {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let score = parse_score_output(&output.stdout)?;
        let reason = format!("{} script returned {}", self.script_language, score);
        Ok((score, reason))
    }
}
