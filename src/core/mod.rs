//! Core functionality for the WatchHer monitor.
//!
//! This module contains:
//! - Sliding sample windows and the per-tick aggregator
//! - Feature computation from the windows
//! - The tree-ensemble risk classifier
//! - The alert state machine

pub mod alert;
pub mod classifier;
pub mod features;
pub mod windowing;

// Re-export commonly used types
pub use alert::{AlertConfig, AlertEffect, AlertState, AlertStateMachine};
pub use classifier::{
    to_percentage, DecisionTree, Forest, ModelError, RiskClassifier, RiskScorer, TreeNode,
};
pub use features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use windowing::{SampleAggregator, SampleWindow};
