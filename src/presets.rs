//! Ready-made rubric trees for demos and tests.

use std::collections::HashMap;

use serde_json::json;

use crate::node::RubricNode;
use crate::scorers::{FunctionScorer, LeafScorer, LlmScorer, ScriptScorer};
use crate::tree::RubricTree;

/// A three-criterion rubric for evaluating a written essay.
///
/// Grammar and content are critical gates; style is advisory.
pub fn simple_essay_rubric() -> RubricTree {
    let grammar = RubricNode::leaf(
        "Grammar and Spelling",
        "Evaluate the correctness of grammar and spelling",
        true,
        LeafScorer::Llm(LlmScorer::new(
            "Evaluate the grammar and spelling in the following text:\n\n\
             {{ text }}\n\n\
             Consider grammatical correctness, spelling accuracy, and proper \
             punctuation.\n\n\
             Return a score between 0 and 1, where 1.0 means perfect grammar \
             and spelling and 0.0 means errors make the text very difficult \
             to understand.\n\nScore: ",
        )),
    );

    let content = RubricNode::leaf(
        "Content Quality",
        "Evaluate the quality and relevance of content",
        true,
        LeafScorer::Llm(LlmScorer::new(
            "Evaluate the content quality of the following text for the topic \
             \"{{ topic }}\":\n\n\
             {{ text }}\n\n\
             Consider relevance to the topic, depth of analysis, use of \
             examples, and logical flow of ideas.\n\n\
             Return a score between 0 and 1, where 1.0 means excellent, \
             highly relevant content and 0.0 means no relevant content.\n\n\
             Score: ",
        )),
    );

    let style = RubricNode::leaf(
        "Writing Style",
        "Evaluate the writing style and clarity",
        false,
        LeafScorer::Llm(LlmScorer::new(
            "Evaluate the writing style of the following text:\n\n\
             {{ text }}\n\n\
             Consider clarity of expression, sentence variety, appropriate \
             tone, and engaging presentation.\n\n\
             Return a score between 0 and 1, where 1.0 means excellent style \
             and 0.0 means an incomprehensible style.\n\nScore: ",
        )),
    );

    let root = RubricNode::parent(
        "Essay Evaluation",
        "Overall evaluation of essay quality",
        false,
        vec![grammar, content, style],
    )
    .expect("essay rubric is well-formed");

    let mut metadata = HashMap::new();
    metadata.insert(
        "description".to_string(),
        json!("Simple essay evaluation rubric"),
    );
    metadata.insert("version".to_string(), json!("1.0"));
    RubricTree::new(root).with_metadata(metadata)
}

const CORRECTNESS_SCRIPT: &str = r#"
import json
import sys

context = json.loads(sys.stdin.read())
test_results = context.get('test_results', {})

if not test_results:
    # No tests provided; assume manual review is needed.
    print(0.5)
else:
    passed = test_results.get('passed', 0)
    total = test_results.get('total', 1)
    print(passed / total if total > 0 else 0)
"#;

const MAINTAINABILITY_FUNCTION: &str = r#"
def score_function(context):
    code = context.get('code', '')
    score = 1.0

    lines = [line.strip() for line in code.split('\n')]
    body_lines = [line for line in lines if line and not line.startswith('#')]
    if len(body_lines) > 50:
        score -= 0.3
    elif len(body_lines) > 30:
        score -= 0.1

    import re
    magic_numbers = re.findall(r'\b\d{2,}\b', code)
    if len(magic_numbers) > 3:
        score -= 0.2

    return max(0.0, score)
"#;

/// A two-branch rubric for code review: a critical functionality
/// branch (test-driven correctness plus an LLM efficiency judgment)
/// and an advisory quality branch (readability and maintainability).
pub fn code_review_rubric() -> RubricTree {
    let correctness = RubricNode::leaf(
        "Correctness",
        "Code produces correct results",
        true,
        LeafScorer::Script(ScriptScorer::python(CORRECTNESS_SCRIPT)),
    );

    let efficiency = RubricNode::leaf(
        "Efficiency",
        "Code is reasonably efficient",
        false,
        LeafScorer::Llm(LlmScorer::new(
            "Evaluate the efficiency of the following code:\n\n\
             {{ code }}\n\n\
             Consider time complexity, space complexity, and algorithm \
             choice.\n\nReturn a score between 0 and 1.\n\nScore: ",
        )),
    );

    let functionality = RubricNode::parent(
        "Functionality",
        "Code functionality and correctness",
        true,
        vec![correctness, efficiency],
    )
    .expect("code review rubric is well-formed");

    let readability = RubricNode::leaf(
        "Readability",
        "Code is easy to read and understand",
        false,
        LeafScorer::Llm(LlmScorer::new(
            "Evaluate the readability of the following code:\n\n\
             {{ code }}\n\n\
             Consider naming, organization, comments, and formatting.\n\n\
             Return a score between 0 and 1.\n\nScore: ",
        )),
    );

    let maintainability = RubricNode::leaf(
        "Maintainability",
        "Code is easy to maintain and modify",
        false,
        LeafScorer::Function(FunctionScorer::from_code(MAINTAINABILITY_FUNCTION)),
    );

    let quality = RubricNode::parent(
        "Code Quality",
        "Code quality and craftsmanship",
        false,
        vec![readability, maintainability],
    )
    .expect("code review rubric is well-formed");

    let root = RubricNode::parent(
        "Code Review",
        "Overall code review evaluation",
        false,
        vec![functionality, quality],
    )
    .expect("code review rubric is well-formed");

    let mut metadata = HashMap::new();
    metadata.insert(
        "description".to_string(),
        json!("Code review evaluation rubric"),
    );
    metadata.insert("version".to_string(), json!("1.0"));
    RubricTree::new(root).with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FixedCompletionClient;
    use crate::scorers::ScoringContext;
    use serde_json::json;

    #[test]
    fn test_essay_rubric_structure() {
        let tree = simple_essay_rubric();
        assert_eq!(tree.root.name, "Essay Evaluation");
        assert_eq!(tree.root.children.len(), 3);

        let names: Vec<&str> = tree.root.children.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Grammar and Spelling"));
        assert!(names.contains(&"Content Quality"));
        assert!(names.contains(&"Writing Style"));

        assert_eq!(tree.root.critical_children().len(), 2);
        assert!(tree.is_valid());
    }

    #[test]
    fn test_code_review_rubric_structure() {
        let tree = code_review_rubric();
        assert_eq!(tree.root.name, "Code Review");
        assert_eq!(tree.root.children.len(), 2);

        let names: Vec<&str> = tree.root.children.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Functionality"));
        assert!(names.contains(&"Code Quality"));
        assert!(tree.is_valid());
    }

    #[test]
    fn test_essay_rubric_evaluates_with_fixed_client() {
        let mut tree = simple_essay_rubric();
        let client = FixedCompletionClient::new("Score: 0.8");

        let mut context = ScoringContext::new();
        context.insert("text".to_string(), json!("A short essay."));
        context.insert("topic".to_string(), json!("testing"));

        let score = tree.evaluate(&context, &client).unwrap();
        // Critical gates at 0.8: mixed performance, mean of all three.
        assert!((score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_code_review_rubric_round_trips() {
        let tree = code_review_rubric();
        let json = tree.to_json().unwrap();
        let restored = RubricTree::from_json(&json).unwrap();

        assert_eq!(restored.statistics(), tree.statistics());
        assert_eq!(restored.leaf_nodes().len(), 4);
    }
}
