//! Rubric tree nodes and the score aggregation algorithm.
//!
//! A node is either a parent (children) or a leaf (scorer), never
//! both. Parents aggregate child scores under a veto/deference/mean
//! rule driven by the `is_critical` flag, and synthesize their
//! justification lazily on first read.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::CompletionClient;
use crate::scorers::{LeafScorer, ScoringContext};
use crate::utilities::errors::{ExplanationError, ScoringError, StructuralError};

/// A criterion in the rubric tree.
///
/// `children` and `scorer` are public so callers can perform explicit
/// repairs and removals; the children-XOR-scorer invariant is enforced
/// at construction and by `add_child`/`set_scorer`, and re-checked by
/// `RubricTree::validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricNode {
    /// Criterion name.
    pub name: String,
    /// What this criterion evaluates.
    pub description: String,
    /// Critical children gate their parent's score.
    #[serde(default)]
    pub is_critical: bool,
    /// Free-form annotations carried through serialization.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Child criteria, in evaluation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RubricNode>,
    /// Leaf scoring strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scorer: Option<LeafScorer>,
    /// Cached score; unset until evaluated. Serialized for inspection
    /// of an evaluated dump, but a loaded tree always starts unscored.
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    /// Cached justification; never serialized.
    #[serde(skip)]
    reason: Option<String>,
}

impl RubricNode {
    /// Create a node, enforcing the children-XOR-scorer invariant.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        is_critical: bool,
        children: Vec<RubricNode>,
        scorer: Option<LeafScorer>,
    ) -> Result<Self, StructuralError> {
        let name = name.into();
        match (children.is_empty(), scorer.is_some()) {
            (false, true) => Err(StructuralError::BothChildrenAndScorer { name }),
            (true, false) => Err(StructuralError::NeitherChildrenNorScorer { name }),
            _ => Ok(Self {
                name,
                description: description.into(),
                is_critical,
                metadata: HashMap::new(),
                children,
                scorer,
                score: None,
                reason: None,
            }),
        }
    }

    /// Create a leaf node. Always structurally valid.
    pub fn leaf(
        name: impl Into<String>,
        description: impl Into<String>,
        is_critical: bool,
        scorer: LeafScorer,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            is_critical,
            metadata: HashMap::new(),
            children: Vec::new(),
            scorer: Some(scorer),
            score: None,
            reason: None,
        }
    }

    /// Create a parent node; fails on an empty child list.
    pub fn parent(
        name: impl Into<String>,
        description: impl Into<String>,
        is_critical: bool,
        children: Vec<RubricNode>,
    ) -> Result<Self, StructuralError> {
        Self::new(name, description, is_critical, children, None)
    }

    /// Attach metadata, builder style.
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    // --- Shape queries ---

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_parent(&self) -> bool {
        !self.children.is_empty()
    }

    /// Critical children, in stored order.
    pub fn critical_children(&self) -> Vec<&RubricNode> {
        self.children.iter().filter(|c| c.is_critical).collect()
    }

    /// Non-critical children, in stored order.
    pub fn non_critical_children(&self) -> Vec<&RubricNode> {
        self.children.iter().filter(|c| !c.is_critical).collect()
    }

    pub fn has_critical_children(&self) -> bool {
        self.children.iter().any(|c| c.is_critical)
    }

    // --- Mutations ---

    /// Add a child node.
    ///
    /// Fails if this node carries a scorer: a node cannot be both a
    /// leaf and a parent. Children are owned by value, so a node can
    /// never end up as its own descendant.
    pub fn add_child(&mut self, child: RubricNode) -> Result<(), StructuralError> {
        if self.scorer.is_some() {
            return Err(StructuralError::BothChildrenAndScorer {
                name: self.name.clone(),
            });
        }
        self.children.push(child);
        Ok(())
    }

    /// Remove the first child with the given name, returning it.
    pub fn remove_child(&mut self, name: &str) -> Option<RubricNode> {
        let index = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(index))
    }

    /// Set the scorer on a leaf node.
    ///
    /// Fails if this node has children.
    pub fn set_scorer(&mut self, scorer: LeafScorer) -> Result<(), StructuralError> {
        if !self.children.is_empty() {
            return Err(StructuralError::BothChildrenAndScorer {
                name: self.name.clone(),
            });
        }
        self.scorer = Some(scorer);
        Ok(())
    }

    // --- Scoring ---

    /// Last computed score, if any.
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    /// Clear cached scores and reasons for this node and all descendants.
    pub fn reset_scores(&mut self) {
        self.score = None;
        self.reason = None;
        for child in &mut self.children {
            child.reset_scores();
        }
    }

    /// Compute this node's score, caching it.
    ///
    /// Leaves delegate to their scorer. Parents evaluate every child
    /// in stored order, then apply, in strict precedence:
    /// 1. veto: any critical child at exactly 0 scores the parent 0;
    /// 2. deference: all critical children at exactly 1 scores the
    ///    parent as the mean of its non-critical children (1 if none);
    /// 3. mean: arithmetic mean of all children otherwise.
    pub fn evaluate(
        &mut self,
        context: &ScoringContext,
        client: &dyn CompletionClient,
    ) -> Result<f64, ScoringError> {
        if self.is_leaf() {
            let scorer = self.scorer.as_ref().ok_or_else(|| ScoringError::MissingScorer {
                name: self.name.clone(),
            })?;
            let (score, reason) = scorer.score(context, client)?;
            log::debug!("leaf '{}' scored {:.4}", self.name, score);
            self.score = Some(score);
            self.reason = Some(reason);
            return Ok(score);
        }

        // Children evaluate strictly sequentially, in stored order.
        let mut all_scores = Vec::with_capacity(self.children.len());
        let mut critical_scores = Vec::new();
        let mut non_critical_scores = Vec::new();

        for child in &mut self.children {
            let score = child.evaluate(context, client)?;
            all_scores.push(score);
            if child.is_critical {
                critical_scores.push(score);
            } else {
                non_critical_scores.push(score);
            }
        }

        // Veto and deference trigger only on bit-exact 0.0 / 1.0.
        let score = if !critical_scores.is_empty() {
            if critical_scores.iter().any(|s| *s == 0.0) {
                0.0
            } else if critical_scores.iter().all(|s| *s == 1.0) {
                if non_critical_scores.is_empty() {
                    1.0
                } else {
                    mean(&non_critical_scores)
                }
            } else {
                mean(&all_scores)
            }
        } else if all_scores.is_empty() {
            0.0
        } else {
            mean(&all_scores)
        };

        log::debug!("parent '{}' aggregated {:.4}", self.name, score);
        self.score = Some(score);
        Ok(score)
    }

    // --- Reason synthesis ---

    /// Cached reason, if one has been produced.
    pub fn cached_reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// The justification for this node's score.
    ///
    /// Leaves return the reason their scorer produced. For a parent
    /// the reason is synthesized lazily on first read: one explanation
    /// request summarizing the children, cached so later reads never
    /// re-request. A failed request is downgraded to a deterministic
    /// templated reason plus a warning; it never fails the evaluation.
    ///
    /// Returns `None` while the node is unscored.
    pub fn reason(&mut self, client: &dyn CompletionClient) -> Option<String> {
        if let Some(reason) = &self.reason {
            return Some(reason.clone());
        }
        let score = self.score?;
        if self.is_leaf() {
            return None;
        }

        let reason = match self.synthesize_reason(score, client) {
            Ok(reason) => reason,
            Err(e) => {
                log::warn!(
                    "explanation request failed for '{}', using fallback: {}",
                    self.name,
                    e
                );
                self.fallback_reason(score)
            }
        };
        self.reason = Some(reason.clone());
        Some(reason)
    }

    fn synthesize_reason(
        &self,
        score: f64,
        client: &dyn CompletionClient,
    ) -> Result<String, ExplanationError> {
        let prompt = self.explanation_prompt(score);
        Ok(client.complete(&prompt, 0.0, None)?)
    }

    fn fallback_reason(&self, score: f64) -> String {
        format!(
            "Score {:.2} derived from {} sub-criteria",
            score,
            self.children.len()
        )
    }

    /// Build the explanation prompt from the children's results.
    fn explanation_prompt(&self, score: f64) -> String {
        let mut lines = String::new();
        for child in &self.children {
            let marker = if child.is_critical { "critical" } else { "non-critical" };
            let child_score = child
                .score
                .map(|s| format!("{s:.2}"))
                .unwrap_or_else(|| "unscored".to_string());
            let child_reason = child
                .cached_reason()
                .unwrap_or("no justification recorded");
            lines.push_str(&format!(
                "- {} ({marker}, score {child_score}): {} -- {}\n",
                child.name, child.description, child_reason
            ));
        }

        format!(
            "You are explaining the result of a rubric evaluation.\n\n\
             The criterion \"{}\" ({}) received a score of {:.2}.\n\n\
             Scores aggregate from sub-criteria as follows:\n\
             - If any critical sub-criterion scores 0, the parent scores 0.\n\
             - If every critical sub-criterion scores 1, the parent scores the \
             average of the non-critical sub-criteria (or 1 if there are none).\n\
             - Otherwise the parent scores the average of all sub-criteria.\n\n\
             Sub-criteria:\n{}\n\
             Write a short justification (2-3 sentences) for the score.",
            self.name, self.description, score, lines
        )
    }
}

fn mean(scores: &[f64]) -> f64 {
    scores.iter().sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FixedCompletionClient;
    use crate::scorers::FunctionScorer;
    use crate::utilities::errors::CompletionError;
    use async_trait::async_trait;

    fn fixed_leaf(name: &str, is_critical: bool, score: f64) -> RubricNode {
        RubricNode::leaf(
            name,
            format!("{name} description"),
            is_critical,
            LeafScorer::Function(FunctionScorer::from_code(format!(
                "def score_function(context): return {score}"
            ))),
        )
    }

    fn client() -> FixedCompletionClient {
        let _ = env_logger::builder().is_test(true).try_init();
        FixedCompletionClient::new("The sub-criteria balance out.")
    }

    /// Completion client whose every request fails.
    #[derive(Debug)]
    struct FailingCompletionClient;

    #[async_trait]
    impl CompletionClient for FailingCompletionClient {
        async fn acomplete(
            &self,
            _prompt: &str,
            _temperature: f64,
            _max_tokens: Option<u32>,
        ) -> Result<String, CompletionError> {
            Err(CompletionError::new("service unavailable"))
        }

        fn complete(
            &self,
            _prompt: &str,
            _temperature: f64,
            _max_tokens: Option<u32>,
        ) -> Result<String, CompletionError> {
            Err(CompletionError::new("service unavailable"))
        }

        fn model(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_leaf_creation() {
        let node = fixed_leaf("Test Node", true, 0.8);
        assert!(node.is_leaf());
        assert!(!node.is_parent());
        assert!(node.scorer.is_some());
        assert_eq!(node.score(), None);
    }

    #[test]
    fn test_invalid_constructions() {
        let scorer = LeafScorer::Function(FunctionScorer::from_code("def score_function(c): return 1"));
        let child = fixed_leaf("Child", false, 1.0);

        let both = RubricNode::new("Invalid", "d", false, vec![child], Some(scorer));
        assert!(matches!(both, Err(StructuralError::BothChildrenAndScorer { .. })));

        let neither = RubricNode::new("Invalid", "d", false, vec![], None);
        assert!(matches!(
            neither,
            Err(StructuralError::NeitherChildrenNorScorer { .. })
        ));
    }

    #[test]
    fn test_add_child_to_leaf_fails() {
        let mut leaf = fixed_leaf("Leaf", false, 0.5);
        let err = leaf.add_child(fixed_leaf("Child", false, 1.0)).unwrap_err();
        assert!(matches!(err, StructuralError::BothChildrenAndScorer { .. }));
    }

    #[test]
    fn test_set_scorer_on_parent_fails() {
        let mut parent =
            RubricNode::parent("P", "d", false, vec![fixed_leaf("C", false, 1.0)]).unwrap();
        let scorer = LeafScorer::Function(FunctionScorer::from_code("def score_function(c): return 1"));
        assert!(parent.set_scorer(scorer).is_err());
    }

    #[test]
    fn test_remove_child() {
        let mut parent = RubricNode::parent(
            "P",
            "d",
            false,
            vec![fixed_leaf("A", false, 1.0), fixed_leaf("B", false, 0.5)],
        )
        .unwrap();

        let removed = parent.remove_child("A").unwrap();
        assert_eq!(removed.name, "A");
        assert_eq!(parent.children.len(), 1);
        assert!(parent.remove_child("A").is_none());
    }

    #[test]
    fn test_veto_rule() {
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("Critical Fail", true, 0.0), fixed_leaf("Advisory", false, 0.9)],
        )
        .unwrap();

        let score = parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_deference_rule() {
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![
                fixed_leaf("Gate", true, 1.0),
                fixed_leaf("Quality A", false, 0.8),
                fixed_leaf("Quality B", false, 0.6),
            ],
        )
        .unwrap();

        let score = parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        assert!((score - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_deference_without_non_critical() {
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("Gate A", true, 1.0), fixed_leaf("Gate B", true, 1.0)],
        )
        .unwrap();

        let score = parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_mixed_critical_uses_overall_mean() {
        // Critical at 0.5: neither veto nor deference applies.
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("Gate", true, 0.5), fixed_leaf("Advisory", false, 1.0)],
        )
        .unwrap();

        let score = parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        assert!((score - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_pure_mean() {
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("A", false, 0.8), fixed_leaf("B", false, 0.6)],
        )
        .unwrap();

        let score = parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        assert!((score - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_near_one_critical_falls_to_mean() {
        // 0.99 is not bit-exact 1.0, so deference must not trigger.
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("Gate", true, 0.99), fixed_leaf("Advisory", false, 0.5)],
        )
        .unwrap();

        let score = parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        assert!((score - 0.745).abs() < 1e-12);
    }

    #[test]
    fn test_leaf_without_scorer_fails_evaluation() {
        let mut leaf = fixed_leaf("Orphan", false, 1.0);
        leaf.scorer = None;

        let err = leaf.evaluate(&ScoringContext::new(), &client()).unwrap_err();
        assert!(matches!(err, ScoringError::MissingScorer { .. }));
    }

    #[test]
    fn test_leaf_reason_comes_from_scorer() {
        let mut leaf = fixed_leaf("Leaf", false, 0.8);
        leaf.evaluate(&ScoringContext::new(), &client()).unwrap();

        let reason = leaf.reason(&client()).unwrap();
        assert!(reason.contains("0.8"));
    }

    #[test]
    fn test_parent_reason_is_lazy_and_cached() {
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("A", false, 0.8), fixed_leaf("B", false, 0.6)],
        )
        .unwrap();

        parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        assert!(parent.cached_reason().is_none());

        let reason = parent.reason(&client()).unwrap();
        assert_eq!(reason, "The sub-criteria balance out.");

        // Cached: a now-failing client is never consulted again.
        let again = parent.reason(&FailingCompletionClient).unwrap();
        assert_eq!(again, reason);
    }

    #[test]
    fn test_parent_reason_fallback_on_failure() {
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("A", false, 0.8), fixed_leaf("B", false, 0.6)],
        )
        .unwrap();

        parent.evaluate(&ScoringContext::new(), &FailingCompletionClient).unwrap();
        let reason = parent.reason(&FailingCompletionClient).unwrap();
        assert!(reason.contains("derived from 2 sub-criteria"));
    }

    #[test]
    fn test_reason_none_while_unscored() {
        let mut parent =
            RubricNode::parent("Parent", "d", false, vec![fixed_leaf("A", false, 0.8)]).unwrap();
        assert!(parent.reason(&client()).is_none());
    }

    #[test]
    fn test_reset_clears_scores_and_reasons() {
        let mut parent = RubricNode::parent(
            "Parent",
            "d",
            false,
            vec![fixed_leaf("A", false, 0.8), fixed_leaf("B", false, 0.6)],
        )
        .unwrap();

        parent.evaluate(&ScoringContext::new(), &client()).unwrap();
        parent.reason(&client()).unwrap();
        parent.reset_scores();

        assert_eq!(parent.score(), None);
        assert!(parent.cached_reason().is_none());
        assert!(parent.children.iter().all(|c| c.score().is_none()));
    }

    #[test]
    fn test_explanation_prompt_mentions_children() {
        let mut parent = RubricNode::parent(
            "Overall",
            "overall quality",
            false,
            vec![fixed_leaf("Clarity", true, 1.0), fixed_leaf("Depth", false, 0.5)],
        )
        .unwrap();
        parent.evaluate(&ScoringContext::new(), &client()).unwrap();

        let prompt = parent.explanation_prompt(parent.score().unwrap());
        assert!(prompt.contains("Clarity"));
        assert!(prompt.contains("critical"));
        assert!(prompt.contains("Depth"));
        assert!(prompt.contains("0.50"));
    }
}
