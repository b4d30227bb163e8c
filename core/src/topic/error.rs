//! Error types and utilities for the topic module
//!
//! This module contains the composite error type and shared constants
//! for the topic module, while the pattern error stays next to the
//! pattern parser.

use thiserror::Error;

use super::topic_pattern_item::TopicPatternError;

/// Comprehensive error type for all topic-related operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
	/// Topic pattern parsing or validation error
	#[error("Topic pattern error: {0}")]
	Pattern(#[from] TopicPatternError),

	/// Concrete topic rejected for publishing
	#[error("Topic '{topic}' is invalid for publishing: {reason}")]
	InvalidTopic {
		/// The rejected topic
		topic: String,
		/// Why it was rejected
		reason: String,
	},
}

impl TopicError {
	/// Creates a new InvalidTopic error
	pub fn invalid_topic(
		topic: impl Into<String>,
		reason: impl Into<String>,
	) -> Self {
		Self::InvalidTopic {
			topic: topic.into(),
			reason: reason.into(),
		}
	}
}

/// Convenient Result type for topic operations
pub type TopicResult<T> = Result<T, TopicError>;

/// Convenient Result type for pattern operations
pub type PatternResult<T> = Result<T, TopicPatternError>;

/// Topic processing limits and constants
pub mod limits {
	/// Maximum topic length accepted by the MQTT wire format
	pub const MAX_TOPIC_LENGTH: usize = 65535;
}

/// Validation utilities for topic operations
pub mod validation {
	use super::limits::MAX_TOPIC_LENGTH;
	use super::{TopicError, TopicResult};

	/// Validates a concrete topic used for publishing.
	///
	/// Publish topics must be non-empty, fit the wire length limit and
	/// contain neither wildcard characters nor NUL.
	pub fn validate_publish_topic(topic: &str) -> TopicResult<()> {
		if topic.is_empty() || topic.len() > MAX_TOPIC_LENGTH {
			return Err(TopicError::invalid_topic(
				topic,
				"Topic is empty or too long",
			));
		}
		if topic.chars().any(|c| matches!(c, '\0' | '#' | '+')) {
			return Err(TopicError::invalid_topic(
				topic,
				"Topic contains illegal characters ('#', '+', or null byte)",
			));
		}
		Ok(())
	}
}
