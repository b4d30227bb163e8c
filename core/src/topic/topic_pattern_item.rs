//! MQTT topic pattern item types and functionality

use arcstr::Substr;
use thiserror::Error;

/// Error types for topic pattern compilation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicPatternError {
	/// `#` followed by further segments
	#[error("Invalid topic pattern '{pattern}': '#' must be the final segment")]
	HashPosition { pattern: String },

	#[error("Topic pattern cannot be empty")]
	EmptyTopic,
}

impl TopicPatternError {
	pub fn hash_position(pattern: impl Into<String>) -> Self {
		Self::HashPosition {
			pattern: pattern.into(),
		}
	}
}

impl From<std::convert::Infallible> for TopicPatternError {
	fn from(never: std::convert::Infallible) -> Self {
		match never {}
	}
}

/// MQTT topic pattern segment: literal string or wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPatternItem {
	/// Literal string segment
	Str(Substr),
	/// Single-level wildcard `+`
	Plus,
	/// Multi-level wildcard `#`
	Hash,
}

impl TopicPatternItem {
	/// Returns string representation of the pattern item.
	pub fn as_str(&self) -> &str {
		match self {
			| TopicPatternItem::Str(s) => s,
			| TopicPatternItem::Plus => "+",
			| TopicPatternItem::Hash => "#",
		}
	}

	/// Returns true if this item is a wildcard (+ or #).
	pub fn is_wildcard(&self) -> bool {
		matches!(self, TopicPatternItem::Plus | TopicPatternItem::Hash)
	}

	/// Tests a single concrete topic segment against this item.
	///
	/// `#` is not decided per segment; callers handle it before reaching here.
	pub(crate) fn matches_segment(&self, segment: &str) -> bool {
		match self {
			| TopicPatternItem::Str(s) => s.as_str() == segment,
			| TopicPatternItem::Plus => !segment.is_empty(),
			| TopicPatternItem::Hash => true,
		}
	}
}

impl std::fmt::Display for TopicPatternItem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// A segment is a wildcard only when it is exactly `+` or `#`; anything
/// else, including `a+b` or `temp#`, compares literally.
impl From<Substr> for TopicPatternItem {
	fn from(item: Substr) -> Self {
		match item.as_str() {
			| "+" => TopicPatternItem::Plus,
			| "#" => TopicPatternItem::Hash,
			| _ => TopicPatternItem::Str(item),
		}
	}
}
