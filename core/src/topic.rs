//! Topic handling module
//!
//! This module compiles MQTT topic patterns and matches concrete topics
//! against them.

// Submodules
pub mod error;
pub mod topic_pattern_item;
/// Topic pattern compilation and matching
pub mod topic_pattern_path;

#[cfg(test)]
mod topic_pattern_item_tests;

// Re-export commonly used types for convenience
pub use error::{PatternResult, TopicError, TopicResult};
// Re-export constants and validation utilities
pub use error::{limits, validation};
pub use topic_pattern_item::{TopicPatternError, TopicPatternItem};
pub use topic_pattern_path::TopicPatternPath;
