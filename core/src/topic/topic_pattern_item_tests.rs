//! Tests for TopicPatternItem functionality

use arcstr::Substr;

use super::TopicPatternItem;

#[test]
fn test_literal_string_item() {
	let item = TopicPatternItem::from(Substr::from("sensors"));

	assert_eq!(item, TopicPatternItem::Str(Substr::from("sensors")));
	assert_eq!(item.as_str(), "sensors");
	assert!(!item.is_wildcard());
}

#[test]
fn test_plus_wildcard() {
	let item = TopicPatternItem::from(Substr::from("+"));

	assert_eq!(item, TopicPatternItem::Plus);
	assert_eq!(item.as_str(), "+");
	assert!(item.is_wildcard());
}

#[test]
fn test_hash_wildcard() {
	let item = TopicPatternItem::from(Substr::from("#"));

	assert_eq!(item, TopicPatternItem::Hash);
	assert_eq!(item.to_string(), "#");
	assert!(item.is_wildcard());
}

#[test]
fn test_mixed_wildcard_segments_are_literal() {
	for segment in ["a+b", "temp#", "+x", "#x"] {
		let item = TopicPatternItem::from(Substr::from(segment));
		assert_eq!(item, TopicPatternItem::Str(Substr::from(segment)));
		assert!(!item.is_wildcard());
		assert!(item.matches_segment(segment));
		assert!(!item.matches_segment("ab"));
	}
}

#[test]
fn test_literal_with_regex_metacharacters() {
	let item = TopicPatternItem::from(Substr::from("v1.0[x]"));

	assert!(item.matches_segment("v1.0[x]"));
	assert!(!item.matches_segment("v100[x]"));
}

#[test]
fn test_plus_rejects_empty_segment() {
	assert!(TopicPatternItem::Plus.matches_segment("room"));
	assert!(!TopicPatternItem::Plus.matches_segment(""));
}

#[test]
fn test_literal_is_case_sensitive() {
	let item = TopicPatternItem::from(Substr::from("Temp"));

	assert!(item.matches_segment("Temp"));
	assert!(!item.matches_segment("temp"));
}
