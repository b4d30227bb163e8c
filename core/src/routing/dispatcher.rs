use std::sync::Arc;

use arcstr::ArcStr;
use bytes::Bytes;
use rumqttc::QoS;
use tracing::{debug, warn};

use super::pool::{DispatchPool, Submission};
use super::registry::SubscriptionRegistry;
use crate::payload::{self, DecodeError, Payload};

/// Message delivered by the subscribe session. Consumed once by dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
	pub topic: ArcStr,
	pub payload: Bytes,
	pub qos: QoS,
}

impl InboundMessage {
	pub fn new(
		topic: impl Into<ArcStr>,
		payload: impl Into<Bytes>,
		qos: QoS,
	) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos,
		}
	}
}

/// Counters describing what happened to one inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
	/// Entries whose pattern matched the topic
	pub matched: usize,
	/// Handler jobs handed to the pool
	pub submitted: usize,
	/// Entries skipped because the payload failed to decode
	pub decode_failures: usize,
	/// Jobs rejected by the pool (saturated or shut down)
	pub dropped: usize,
}

/// Matches inbound messages against the registry and fans out to handlers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
	registry: Arc<SubscriptionRegistry>,
	pool: DispatchPool,
}

impl Dispatcher {
	pub fn new(registry: Arc<SubscriptionRegistry>, pool: DispatchPool) -> Self {
		Self { registry, pool }
	}

	pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
		&self.registry
	}

	pub fn pool(&self) -> &DispatchPool {
		&self.pool
	}

	/// Dispatches one message to every matching subscription.
	///
	/// JSON decoding happens at most once per message and is shared by the
	/// entries that asked for it; entries with decoding disabled receive the
	/// raw bytes. A decode failure only skips the entries that needed the
	/// decoded value.
	pub async fn dispatch(&self, message: InboundMessage) -> DispatchReport {
		let InboundMessage { topic, payload: raw, .. } = message;
		let matched = self.registry.matching_entries(&topic);
		let mut report = DispatchReport {
			matched: matched.len(),
			..DispatchReport::default()
		};
		if matched.is_empty() {
			debug!(topic = %topic, "No subscription matches topic");
			return report;
		}

		let mut decoded: Option<Result<Payload, DecodeError>> = None;
		for subscription in matched {
			let delivered = if subscription.decode_payload() {
				match decoded.get_or_insert_with(|| payload::decode_json(&raw)) {
					| Ok(value) => value.clone(),
					| Err(err) => {
						warn!(
							topic = %topic,
							pattern = %subscription.pattern(),
							payload_size = raw.len(),
							error = %err,
							"Failed to decode MQTT message payload"
						);
						report.decode_failures += 1;
						continue;
					}
				}
			} else {
				Payload::Bytes(raw.clone())
			};

			let handler = Arc::clone(subscription.handler());
			let pattern = subscription.pattern().pattern().clone();
			let label = pattern.clone();
			let job_topic = topic.clone();
			let submission = self
				.pool
				.submit(label.as_str(), async move {
					if let Err(err) = handler.handle(job_topic.clone(), delivered).await {
						warn!(
							topic = %job_topic,
							pattern = %pattern,
							error = %err,
							"Message handler failed"
						);
					}
				})
				.await;
			match submission {
				| Submission::Accepted => report.submitted += 1,
				| Submission::Dropped | Submission::Closed => report.dropped += 1,
			}
		}
		debug!(topic = %topic, report = ?report, "Dispatched MQTT message");
		report
	}
}
