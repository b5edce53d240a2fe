//! The rubric tree aggregate root.
//!
//! Owns one root `RubricNode` exclusively (no external references into
//! the interior, no parent back-references) and adds validation,
//! serialization, statistics, and the evaluation entry point.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::CompletionClient;
use crate::node::RubricNode;
use crate::scorers::ScoringContext;
use crate::utilities::errors::{RubricError, ScoringError, StructuralError};

/// A complete rubric: one owned node tree plus tree-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricTree {
    /// The root criterion.
    pub root: RubricNode,
    /// Tree-level annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Optional schema/content version tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Node counts and depth from a single traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub leaf_nodes: usize,
    pub parent_nodes: usize,
    /// Depth of the deepest node; the root sits at depth 0.
    pub max_depth: usize,
}

impl RubricTree {
    pub fn new(root: RubricNode) -> Self {
        Self {
            root,
            metadata: HashMap::new(),
            version: None,
        }
    }

    /// Attach metadata, builder style.
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    // --- Validation ---

    /// Collect every structural violation as a descriptive string.
    ///
    /// Non-throwing so callers can attempt repair (e.g. generating a
    /// missing scorer) before evaluating. An empty list means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        Self::validate_node(&self.root, &mut errors);
        errors
    }

    fn validate_node(node: &RubricNode, errors: &mut Vec<String>) {
        match (node.children.is_empty(), node.scorer.is_some()) {
            (true, false) => {
                errors.push(format!("Leaf node '{}' has no scorer", node.name));
            }
            (false, true) => {
                errors.push(format!(
                    "Node '{}' has both children and a scorer",
                    node.name
                ));
            }
            _ => {}
        }
        for child in &node.children {
            Self::validate_node(child, errors);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    // --- Evaluation ---

    /// Evaluate the whole tree against a context.
    ///
    /// Resets every cached score and reason first, then evaluates the
    /// root and returns its score. Distinct from `score()`, which only
    /// reads the cached value and never recomputes.
    pub fn evaluate(
        &mut self,
        context: &ScoringContext,
        client: &dyn CompletionClient,
    ) -> Result<f64, ScoringError> {
        self.root.reset_scores();
        let score = self.root.evaluate(context, client)?;
        log::debug!("tree '{}' evaluated to {:.4}", self.root.name, score);
        Ok(score)
    }

    /// The root's cached score from the last evaluation, if any.
    pub fn score(&self) -> Option<f64> {
        self.root.score()
    }

    /// The root's justification, synthesized lazily on first read.
    pub fn reason(&mut self, client: &dyn CompletionClient) -> Option<String> {
        self.root.reason(client)
    }

    /// Clear every cached score and reason.
    pub fn reset_scores(&mut self) {
        self.root.reset_scores();
    }

    // --- Views ---

    pub fn root(&self) -> &RubricNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut RubricNode {
        &mut self.root
    }

    /// Every node, preorder.
    pub fn all_nodes(&self) -> Vec<&RubricNode> {
        let mut nodes = Vec::new();
        Self::collect_nodes(&self.root, &mut nodes);
        nodes
    }

    fn collect_nodes<'a>(node: &'a RubricNode, out: &mut Vec<&'a RubricNode>) {
        out.push(node);
        for child in &node.children {
            Self::collect_nodes(child, out);
        }
    }

    /// Every leaf node, preorder.
    pub fn leaf_nodes(&self) -> Vec<&RubricNode> {
        self.all_nodes().into_iter().filter(|n| n.is_leaf()).collect()
    }

    /// Every parent node, preorder.
    pub fn parent_nodes(&self) -> Vec<&RubricNode> {
        self.all_nodes().into_iter().filter(|n| n.is_parent()).collect()
    }

    /// Mutable access to every leaf, for explicit repairs.
    pub fn leaf_nodes_mut(&mut self) -> Vec<&mut RubricNode> {
        let mut leaves = Vec::new();
        Self::collect_leaves_mut(&mut self.root, &mut leaves);
        leaves
    }

    fn collect_leaves_mut<'a>(node: &'a mut RubricNode, out: &mut Vec<&'a mut RubricNode>) {
        if node.is_leaf() {
            out.push(node);
        } else {
            for child in &mut node.children {
                Self::collect_leaves_mut(child, out);
            }
        }
    }

    /// Depth of the deepest node (root at 0).
    pub fn depth(&self) -> usize {
        self.statistics().max_depth
    }

    /// Node counts and maximum depth in a single traversal.
    pub fn statistics(&self) -> TreeStats {
        let mut stats = TreeStats {
            total_nodes: 0,
            leaf_nodes: 0,
            parent_nodes: 0,
            max_depth: 0,
        };
        Self::walk_stats(&self.root, 0, &mut stats);
        stats
    }

    fn walk_stats(node: &RubricNode, depth: usize, stats: &mut TreeStats) {
        stats.total_nodes += 1;
        if node.is_leaf() {
            stats.leaf_nodes += 1;
        } else {
            stats.parent_nodes += 1;
        }
        stats.max_depth = stats.max_depth.max(depth);
        for child in &node.children {
            Self::walk_stats(child, depth + 1, stats);
        }
    }

    // --- Serialization ---

    /// Serialize to the JSON-compatible wire form.
    pub fn to_value(&self) -> Result<Value, StructuralError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode from the wire form, re-checking the shape invariant.
    pub fn from_value(value: Value) -> Result<Self, StructuralError> {
        let tree: RubricTree = serde_json::from_value(value)?;
        Self::check_shape(&tree.root)?;
        Ok(tree)
    }

    fn check_shape(node: &RubricNode) -> Result<(), StructuralError> {
        match (node.children.is_empty(), node.scorer.is_some()) {
            (false, true) => {
                return Err(StructuralError::BothChildrenAndScorer {
                    name: node.name.clone(),
                })
            }
            (true, false) => {
                return Err(StructuralError::NeitherChildrenNorScorer {
                    name: node.name.clone(),
                })
            }
            _ => {}
        }
        for child in &node.children {
            Self::check_shape(child)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, StructuralError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StructuralError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Write the tree to a JSON file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), RubricError> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a tree from a JSON file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}
