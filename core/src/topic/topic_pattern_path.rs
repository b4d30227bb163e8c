use std::convert::TryFrom;
use std::fmt::{self, Display};

use arcstr::ArcStr;

use super::error::PatternResult;
use super::topic_pattern_item::{TopicPatternError, TopicPatternItem};

/// Compiled MQTT topic pattern.
///
/// Built once from a pattern string such as `sensors/+/temp` or `sensors/#`
/// and then used to test concrete topics. Matching works on `/`-separated
/// segments, never on a translated regular expression. Only a segment that is
/// exactly `+` or `#` is a wildcard; `a+b` is an ordinary literal.
///
/// ```rust
/// use mqtt_connector_core::TopicPatternPath;
///
/// let pattern = TopicPatternPath::compile("a/+/c").unwrap();
/// assert!(pattern.matches("a/b/c"));
/// assert!(!pattern.matches("a/b/b/c"));
/// assert!(!pattern.matches("a/c"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPatternPath {
	pattern: ArcStr,
	segments: Vec<TopicPatternItem>,
}

impl TopicPatternPath {
	/// Compiles a topic pattern.
	///
	/// # Errors
	/// - [`TopicPatternError::EmptyTopic`] for empty input
	/// - [`TopicPatternError::HashPosition`] if `#` is not the final segment
	pub fn compile(topic_pattern: impl Into<ArcStr>) -> PatternResult<Self> {
		let topic_pattern = topic_pattern.into();
		if topic_pattern.is_empty() {
			return Err(TopicPatternError::EmptyTopic);
		}

		let segments = topic_pattern
			.split('/')
			.map(|s| topic_pattern.substr_from(s))
			.map(TopicPatternItem::from)
			.collect::<Vec<_>>();

		if let Some(hash_pos) = segments
			.iter()
			.position(|s| matches!(s, TopicPatternItem::Hash))
		{
			if hash_pos != segments.len() - 1 {
				return Err(TopicPatternError::hash_position(
					topic_pattern.as_str(),
				));
			}
		}

		Ok(Self {
			pattern: topic_pattern,
			segments,
		})
	}

	/// Tests a concrete topic against this pattern.
	///
	/// The whole topic must be consumed: `+` takes exactly one non-empty
	/// segment, `#` takes the non-empty remainder, literals compare exactly.
	pub fn matches(&self, topic: &str) -> bool {
		let mut topic_segments = topic.split('/');
		for item in &self.segments {
			if let TopicPatternItem::Hash = item {
				return match (topic_segments.next(), topic_segments.next()) {
					| (None, _) => false,
					| (Some(last), None) => !last.is_empty(),
					| (Some(_), Some(_)) => true,
				};
			}
			match topic_segments.next() {
				| Some(segment) if item.matches_segment(segment) => {}
				| _ => return false,
			}
		}
		topic_segments.next().is_none()
	}

	/// Original pattern string, as sent to the broker.
	pub fn as_str(&self) -> &str {
		self.pattern.as_str()
	}

	/// Shared handle to the original pattern string.
	pub fn pattern(&self) -> &ArcStr {
		&self.pattern
	}

	/// Parsed segments.
	pub fn segments(&self) -> &[TopicPatternItem] {
		&self.segments
	}

	/// Returns true if the pattern contains `+` or `#`.
	pub fn is_wildcard(&self) -> bool {
		self.segments.iter().any(TopicPatternItem::is_wildcard)
	}
}

impl Display for TopicPatternPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.pattern)
	}
}

impl TryFrom<&str> for TopicPatternPath {
	type Error = TopicPatternError;

	fn try_from(pattern: &str) -> Result<Self, Self::Error> {
		Self::compile(pattern)
	}
}

impl TryFrom<String> for TopicPatternPath {
	type Error = TopicPatternError;

	fn try_from(pattern: String) -> Result<Self, Self::Error> {
		Self::compile(pattern)
	}
}

impl TryFrom<ArcStr> for TopicPatternPath {
	type Error = TopicPatternError;

	fn try_from(pattern: ArcStr) -> Result<Self, Self::Error> {
		Self::compile(pattern)
	}
}
