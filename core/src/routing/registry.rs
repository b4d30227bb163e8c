use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;
use parking_lot::RwLock;
use rumqttc::QoS;
use tracing::debug;

use super::handler::MessageHandler;
use crate::topic::{TopicPatternError, TopicPatternPath};

/// One registered subscription: compiled pattern plus delivery settings.
///
/// Entries are immutable once registered. Re-registering a pattern swaps in
/// a new entry, so a reader holding an `Arc<Subscription>` never sees a
/// half-updated value.
pub struct Subscription {
	pattern: TopicPatternPath,
	qos: QoS,
	handler: Arc<dyn MessageHandler>,
	decode_payload: bool,
}

impl Subscription {
	pub fn pattern(&self) -> &TopicPatternPath {
		&self.pattern
	}

	pub fn qos(&self) -> QoS {
		self.qos
	}

	pub fn handler(&self) -> &Arc<dyn MessageHandler> {
		&self.handler
	}

	pub fn decode_payload(&self) -> bool {
		self.decode_payload
	}

	pub fn matches(&self, topic: &str) -> bool {
		self.pattern.matches(topic)
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("pattern", &self.pattern.as_str())
			.field("qos", &self.qos)
			.field("decode_payload", &self.decode_payload)
			.finish_non_exhaustive()
	}
}

/// Thread-safe map from topic pattern to subscription.
///
/// Holds at most one entry per distinct pattern string. Entries keep their
/// first registration position, so snapshots and matches come back in
/// registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
	entries: RwLock<Vec<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Compiles `pattern` and inserts or replaces its entry.
	///
	/// Nothing changes if the pattern fails to compile.
	pub fn register(
		&self,
		pattern: impl Into<ArcStr>,
		qos: QoS,
		handler: Arc<dyn MessageHandler>,
		decode_payload: bool,
	) -> Result<Arc<Subscription>, TopicPatternError> {
		let pattern = TopicPatternPath::compile(pattern)?;
		let subscription = Arc::new(Subscription {
			pattern,
			qos,
			handler,
			decode_payload,
		});

		let mut entries = self.entries.write();
		match entries
			.iter()
			.position(|entry| entry.pattern.as_str() == subscription.pattern.as_str())
		{
			| Some(pos) => {
				debug!(pattern = %subscription.pattern, "Replacing subscription");
				entries[pos] = Arc::clone(&subscription);
			}
			| None => {
				debug!(pattern = %subscription.pattern, qos = ?qos, "Registering subscription");
				entries.push(Arc::clone(&subscription));
			}
		}
		Ok(subscription)
	}

	/// Point-in-time copy of every entry, in registration order.
	pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
		self.entries.read().clone()
	}

	/// Every entry whose pattern matches `topic`, in registration order.
	pub fn matching_entries(&self, topic: &str) -> Vec<Arc<Subscription>> {
		self.entries
			.read()
			.iter()
			.filter(|entry| entry.matches(topic))
			.cloned()
			.collect()
	}

	/// Registered pattern strings, in registration order.
	pub fn patterns(&self) -> Vec<ArcStr> {
		self.entries
			.read()
			.iter()
			.map(|entry| entry.pattern.pattern().clone())
			.collect()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl fmt::Debug for SubscriptionRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SubscriptionRegistry")
			.field("patterns", &self.patterns())
			.finish()
	}
}
