//! Function-based leaf scorer.
//!
//! Caller-supplied Python source defines a named entry point; the
//! source is wrapped in a generated harness and run in a fresh
//! interpreter process, which is the isolation boundary for this
//! arbitrary-code-execution surface. The entry point receives the
//! context mapping and must return a number in [0, 1].

use std::io::Write;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{run_interpreter, validate_score_range, ScoringContext};
use crate::utilities::errors::ScoringError;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

fn default_function_name() -> String {
    "score_function".to_string()
}

/// Scorer that executes a named function from caller-supplied source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionScorer {
    /// Source code defining the entry point.
    pub function_code: String,
    /// Name of the entry point to invoke.
    #[serde(default = "default_function_name")]
    pub function_name: String,
}

impl FunctionScorer {
    pub fn new(function_code: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            function_code: function_code.into(),
            function_name: function_name.into(),
        }
    }

    /// Create a scorer using the default entry point name.
    pub fn from_code(function_code: impl Into<String>) -> Self {
        Self::new(function_code, default_function_name())
    }

    /// Build the harness script that loads the context, invokes the
    /// entry point, and prints its numeric result.
    fn harness(&self) -> String {
        format!(
            "import json as _json\nimport sys as _sys\n\n{code}\n\n\
             if '{name}' not in dir():\n    \
             raise NameError(\"function '{name}' not found in code\")\n\
             _context = _json.loads(_sys.stdin.read())\n\
             _result = {name}(_context)\n\
             if not isinstance(_result, (int, float)):\n    \
             raise TypeError('function must return a number, got ' + type(_result).__name__)\n\
             print(float(_result))\n",
            code = self.function_code,
            name = self.function_name,
        )
    }

    /// Execute the function and return its `(score, reason)` pair.
    ///
    /// Runs with no enforced timeout: the call blocks for the full
    /// duration of the executed code.
    pub fn score(&self, context: &ScoringContext) -> Result<(f64, String), ScoringError> {
        if !IDENTIFIER_RE.is_match(&self.function_name) {
            return Err(ScoringError::FunctionFailed {
                message: format!("invalid entry point name: '{}'", self.function_name),
            });
        }

        let mut script_file = tempfile::Builder::new().suffix(".py").tempfile()?;
        script_file.write_all(self.harness().as_bytes())?;
        script_file.flush()?;

        let context_json = serde_json::to_string(context)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        log::debug!("running function scorer entry point '{}'", self.function_name);

        let rt = tokio::runtime::Runtime::new()?;
        let output = rt.block_on(run_interpreter(
            "python3",
            script_file.path(),
            &context_json,
            None,
        ))?;

        if !output.status.success() {
            return Err(ScoringError::FunctionFailed {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let trimmed = text.trim();
        let value: f64 = trimmed.parse().map_err(|_| ScoringError::FunctionFailed {
            message: format!("unexpected function output: {trimmed}"),
        })?;
        let score = validate_score_range(value)?;

        let reason = format!("function '{}' returned {}", self.function_name, score);
        Ok((score, reason))
    }
}
