//! Shared utilities: error types and prompt template rendering.

pub mod errors;
pub mod templates;
