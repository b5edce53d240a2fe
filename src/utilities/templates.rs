//! Prompt template rendering.
//!
//! Thin wrapper around `tera` one-off rendering so scorer code deals
//! with a context mapping rather than the engine's own context type.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Render a template string against a context mapping.
///
/// Uses standard `{{ variable }}` substitution. Variables referenced
/// by the template but absent from the context render as empty text
/// rather than failing the render.
///
/// # Errors
///
/// Returns a `tera::Error` if the template is malformed.
pub fn render_template(
    template: &str,
    context: &HashMap<String, Value>,
) -> Result<String, tera::Error> {
    let mut ctx = Context::new();
    for (key, value) in context {
        ctx.insert(key, value);
    }
    for captures in VARIABLE_RE.captures_iter(template) {
        let name = &captures[1];
        if !context.contains_key(name) {
            ctx.insert(name, "");
        }
    }
    Tera::one_off(template, &ctx, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_simple_variable() {
        let mut context = HashMap::new();
        context.insert("text".to_string(), json!("hello world"));

        let rendered = render_template("Evaluate: {{ text }}", &context).unwrap();
        assert_eq!(rendered, "Evaluate: hello world");
    }

    #[test]
    fn test_render_non_string_value() {
        let mut context = HashMap::new();
        context.insert("count".to_string(), json!(3));

        let rendered = render_template("{{ count }} items", &context).unwrap();
        assert_eq!(rendered, "3 items");
    }

    #[test]
    fn test_render_no_variables() {
        let context = HashMap::new();
        let rendered = render_template("static prompt", &context).unwrap();
        assert_eq!(rendered, "static prompt");
    }

    #[test]
    fn test_render_undefined_variable_as_empty() {
        let mut context = HashMap::new();
        context.insert("text".to_string(), json!("hello"));

        let rendered =
            render_template("Evaluate: {{ text }} on {{ topic }}", &context).unwrap();
        assert_eq!(rendered, "Evaluate: hello on ");
    }

    #[test]
    fn test_render_malformed_template() {
        let context = HashMap::new();
        assert!(render_template("{{ unclosed", &context).is_err());
    }
}
