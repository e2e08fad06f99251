//! Tree-ensemble risk classifier.
//!
//! A forest is loaded once from a JSON asset and never mutated afterwards,
//! so a single [`RiskClassifier`] can be shared across threads behind an
//! `Arc` and evaluated concurrently.
//!
//! Two tree encodings are accepted, and may be mixed within one asset:
//!
//! ```text
//! flattened:  {"feature":[0,-2,-2], "threshold":[80.0,-2.0,-2.0],
//!              "left":[1,-1,-1], "right":[2,-1,-1],
//!              "value":[[0.5,0.5],[0.9,0.1],[0.2,0.8]]}
//! nested:     {"split":{"feature":0, "threshold":80.0,
//!                       "left":{"leaf":0.1}, "right":{"leaf":0.8}}}
//! ```
//!
//! In the flattened form a negative `feature` marks a leaf and the leaf value
//! is the positive-class share of its `value` row.

use crate::core::features::{FeatureVector, FEATURE_COUNT};
use crate::stats::SharedStats;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while loading a forest asset.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model asset {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid model JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Model contains no trees")]
    EmptyForest,

    #[error("Invalid tree {tree}: {reason}")]
    InvalidTree { tree: usize, reason: String },
}

/// Nested description of a tree, as found in model assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf(f64),
}

impl TreeNode {
    pub fn leaf(value: f64) -> Self {
        TreeNode::Leaf(value)
    }

    pub fn split(feature: usize, threshold: f64, left: TreeNode, right: TreeNode) -> Self {
        TreeNode::Split {
            feature,
            threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

/// Parallel-array tree layout exported by the training pipeline.
#[derive(Debug, Deserialize)]
struct FlatTree {
    feature: Vec<i64>,
    threshold: Vec<f64>,
    left: Vec<i64>,
    right: Vec<i64>,
    value: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TreeAsset {
    Flat(FlatTree),
    Nested(TreeNode),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(f64),
}

/// A validated binary decision tree stored as a node arena.
///
/// Children always sit at a higher index than their parent, so evaluation
/// terminates and never indexes out of bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Build a tree from its nested description.
    pub fn from_node(root: &TreeNode) -> Result<Self, ModelError> {
        Self::from_nested(root).map_err(|reason| ModelError::InvalidTree { tree: 0, reason })
    }

    fn from_nested(root: &TreeNode) -> Result<Self, String> {
        let mut nodes = Vec::new();
        push_nested(root, &mut nodes)?;
        Ok(Self { nodes })
    }

    fn from_flat(flat: &FlatTree) -> Result<Self, String> {
        let n = flat.feature.len();
        if n == 0 {
            return Err("tree has no nodes".to_string());
        }
        if flat.threshold.len() != n
            || flat.left.len() != n
            || flat.right.len() != n
            || flat.value.len() != n
        {
            return Err(format!(
                "array lengths differ (feature {}, threshold {}, left {}, right {}, value {})",
                n,
                flat.threshold.len(),
                flat.left.len(),
                flat.right.len(),
                flat.value.len()
            ));
        }

        let child = |index: usize, raw: i64| -> Result<usize, String> {
            let target = usize::try_from(raw)
                .map_err(|_| format!("node {index} has invalid child {raw}"))?;
            if target <= index || target >= n {
                return Err(format!("node {index} has out-of-order child {raw}"));
            }
            Ok(target)
        };

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let node = if flat.feature[i] < 0 {
                Node::Leaf(checked_leaf(leaf_share(&flat.value[i], i)?, i)?)
            } else {
                let feature = flat.feature[i] as usize;
                Node::Split {
                    feature: checked_feature(feature, i)?,
                    threshold: checked_threshold(flat.threshold[i], i)?,
                    left: child(i, flat.left[i])?,
                    right: child(i, flat.right[i])?,
                }
            };
            nodes.push(node);
        }

        Ok(Self { nodes })
    }

    /// Leaf value reached by `features`. Ties go left.
    pub fn predict(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[feature] <= threshold {
                        left
                    } else {
                        right
                    };
                }
                Node::Leaf(value) => return value,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn push_nested(node: &TreeNode, nodes: &mut Vec<Node>) -> Result<usize, String> {
    let index = nodes.len();
    match node {
        TreeNode::Leaf(value) => {
            nodes.push(Node::Leaf(checked_leaf(*value, index)?));
        }
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let feature = checked_feature(*feature, index)?;
            let threshold = checked_threshold(*threshold, index)?;
            // Reserve the slot so children land after their parent.
            nodes.push(Node::Leaf(0.0));
            let left = push_nested(left, nodes)?;
            let right = push_nested(right, nodes)?;
            nodes[index] = Node::Split {
                feature,
                threshold,
                left,
                right,
            };
        }
    }
    Ok(index)
}

fn leaf_share(row: &[f64], index: usize) -> Result<f64, String> {
    match row {
        [] => Err(format!("leaf {index} has an empty value row")),
        [single] => Ok(*single),
        weights => {
            let total: f64 = weights.iter().sum();
            if !total.is_finite() || total <= 0.0 {
                return Err(format!("leaf {index} has non-positive class weights"));
            }
            Ok(weights[1] / total)
        }
    }
}

fn checked_leaf(value: f64, index: usize) -> Result<f64, String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("leaf {index} value {value} is outside [0, 1]"))
    }
}

fn checked_feature(feature: usize, index: usize) -> Result<usize, String> {
    if feature < FEATURE_COUNT {
        Ok(feature)
    } else {
        Err(format!(
            "node {index} splits on feature {feature}, expected < {FEATURE_COUNT}"
        ))
    }
}

fn checked_threshold(threshold: f64, index: usize) -> Result<f64, String> {
    if threshold.is_finite() {
        Ok(threshold)
    } else {
        Err(format!("node {index} has non-finite threshold"))
    }
}

/// An ordered, non-empty, immutable collection of trees.
#[derive(Debug, Clone, PartialEq)]
pub struct Forest {
    trees: Vec<DecisionTree>,
}

impl Forest {
    pub fn new(trees: Vec<DecisionTree>) -> Result<Self, ModelError> {
        if trees.is_empty() {
            return Err(ModelError::EmptyForest);
        }
        Ok(Self { trees })
    }

    /// Parse and validate a forest asset.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let assets: Vec<TreeAsset> = serde_json::from_str(json)?;

        let trees = assets
            .iter()
            .enumerate()
            .map(|(tree, asset)| {
                match asset {
                    TreeAsset::Flat(flat) => DecisionTree::from_flat(flat),
                    TreeAsset::Nested(root) => DecisionTree::from_nested(root),
                }
                .map_err(|reason| ModelError::InvalidTree { tree, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(trees)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Scores feature vectors with a forest. Pure and thread-safe.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    forest: Forest,
}

impl RiskClassifier {
    pub fn new(forest: Forest) -> Self {
        Self { forest }
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(Self::new(Forest::from_json(json)?))
    }

    /// Load a forest asset from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let classifier = Self::from_json(&json)?;
        tracing::info!(path = ?path, trees = classifier.tree_count(), "risk model loaded");
        Ok(classifier)
    }

    /// Mean leaf value across trees, clamped to [0, 1].
    pub fn predict(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let sum: f64 = self.forest.trees.iter().map(|t| t.predict(features)).sum();
        (sum / self.forest.len() as f64).clamp(0.0, 1.0)
    }

    pub fn predict_features(&self, features: &FeatureVector) -> f64 {
        self.predict(&features.as_array())
    }

    pub fn tree_count(&self) -> usize {
        self.forest.len()
    }
}

/// Convert a probability into the canonical wire percentage.
pub fn to_percentage(probability: f64) -> f64 {
    if !probability.is_finite() {
        return 0.0;
    }
    (probability * 100.0).round().clamp(0.0, 100.0)
}

/// A classifier that may be missing, with the fallback made observable.
///
/// A missing or broken model scores every vector as 0 (never alerting),
/// logs the fact, and counts each substituted prediction.
#[derive(Debug, Clone)]
pub struct RiskScorer {
    classifier: Option<Arc<RiskClassifier>>,
    stats: SharedStats,
}

impl RiskScorer {
    pub fn new(classifier: Option<Arc<RiskClassifier>>, stats: SharedStats) -> Self {
        Self { classifier, stats }
    }

    /// Load the model at `path`, falling back to the zero scorer on failure.
    pub fn load_or_fallback(path: impl AsRef<Path>, stats: SharedStats) -> Self {
        let classifier = match RiskClassifier::load(path.as_ref()) {
            Ok(classifier) => Some(Arc::new(classifier)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = ?path.as_ref(),
                    "risk model unavailable, confidence will default to 0"
                );
                None
            }
        };
        Self::new(classifier, stats)
    }

    pub fn has_model(&self) -> bool {
        self.classifier.is_some()
    }

    /// Probability in [0, 1]; 0 when no model is loaded.
    pub fn score(&self, features: &FeatureVector) -> f64 {
        match self.classifier {
            Some(ref classifier) => {
                self.stats.record_prediction();
                classifier.predict_features(features)
            }
            None => {
                self.stats.record_model_fallback();
                tracing::debug!("no risk model loaded, scoring 0");
                0.0
            }
        }
    }

    /// Score as a wire percentage.
    pub fn score_percentage(&self, features: &FeatureVector) -> f64 {
        to_percentage(self.score(features))
    }
}
