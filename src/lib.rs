//! # rubric
//!
//! Tree-based rubric evaluation engine. An artifact (essay text,
//! source code, a document) is scored against a hierarchy of named
//! criteria: leaves delegate to pluggable scoring strategies (external
//! script, dynamically executed function, LLM judgment) and parents
//! aggregate child scores under a veto/deference/mean rule driven by
//! a `critical` flag. Parent justifications are synthesized lazily
//! through the same completion service the LLM scorer uses.
//!
//! One evaluation pass is synchronous and strictly sequential, so
//! results are deterministic for deterministic scorers.

pub mod llm;
pub mod node;
pub mod presets;
pub mod scorers;
pub mod tree;
pub mod utilities;

pub use llm::{CompletionClient, FixedCompletionClient, OpenAiClient};
pub use node::RubricNode;
pub use scorers::{FunctionScorer, LeafScorer, LlmScorer, ScoringContext, ScriptScorer};
pub use tree::{RubricTree, TreeStats};
pub use utilities::errors::{
    CompletionError, ExplanationError, RubricError, ScoringError, StructuralError,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
