//! Adapter between dispatched payloads and a downstream record sink.
//!
//! [`FetchAdapter`] is registered as an ordinary message handler. It turns
//! each payload into sink records according to its shape and forwards them
//! to a [`RecordSink`].

use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rumqttc::QoS;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::MqttConnectorError;
use crate::client::config::qos_level;
use crate::payload::Payload;
use crate::routing::{HandlerResult, MessageHandler};

/// Column used for the receive time of scalar payloads by default
pub const DEFAULT_DATETIME_COLUMN: &str = "timestamp";

/// Outcome reported by a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
	pub success: bool,
	pub message: String,
}

impl SinkOutcome {
	pub fn ok(message: impl Into<String>) -> Self {
		Self {
			success: true,
			message: message.into(),
		}
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			success: false,
			message: message.into(),
		}
	}
}

/// Downstream store for decoded records.
#[async_trait]
pub trait RecordSink: Send + Sync + 'static {
	/// Stores `records`. With `check_existing` the sink should skip records
	/// it already holds.
	async fn accept(&self, records: Vec<Value>, check_existing: bool) -> SinkOutcome;
}

#[derive(Debug, Error)]
#[error("sink rejected {records} record(s) from '{topic}': {message}")]
pub struct SinkRejected {
	pub topic: String,
	pub records: usize,
	pub message: String,
}

/// Message handler that forwards payloads to a [`RecordSink`].
pub struct FetchAdapter<S> {
	sink: Arc<S>,
	datetime_column: String,
}

impl<S> std::fmt::Debug for FetchAdapter<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FetchAdapter")
			.field("datetime_column", &self.datetime_column)
			.finish_non_exhaustive()
	}
}

impl<S: RecordSink> FetchAdapter<S> {
	pub fn new(sink: Arc<S>) -> Self {
		Self {
			sink,
			datetime_column: DEFAULT_DATETIME_COLUMN.to_string(),
		}
	}

	pub fn with_datetime_column(mut self, column: impl Into<String>) -> Self {
		self.datetime_column = column.into();
		self
	}

	pub fn datetime_column(&self) -> &str {
		&self.datetime_column
	}

	/// Translates one payload into sink records and the deduplication flag.
	///
	/// | payload | records | check existing |
	/// |---|---|---|
	/// | mapping | the mapping plus `topic` | yes |
	/// | number, string, bool | `{datetime, value, topic}` | no |
	/// | array | its elements as-is | yes |
	/// | null | `null` as-is | yes |
	/// | raw bytes | lossy UTF-8 string as-is | yes |
	pub fn records(&self, topic: &str, payload: Payload) -> (Vec<Value>, bool) {
		match payload {
			| Payload::Mapping(mut doc) => {
				doc.insert("topic".to_string(), Value::from(topic));
				(vec![Value::Object(doc)], true)
			}
			| Payload::Scalar(value) => {
				let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
				let mut doc = Map::new();
				doc.insert(self.datetime_column.clone(), Value::String(now));
				doc.insert("value".to_string(), value);
				doc.insert("topic".to_string(), Value::from(topic));
				(vec![Value::Object(doc)], false)
			}
			| Payload::Other(Value::Array(items)) => (items, true),
			| Payload::Other(value) => (vec![value], true),
			| Payload::Bytes(bytes) => {
				let text = String::from_utf8_lossy(&bytes).into_owned();
				(vec![Value::String(text)], true)
			}
		}
	}
}

#[async_trait]
impl<S: RecordSink> MessageHandler for FetchAdapter<S> {
	async fn handle(&self, topic: ArcStr, payload: Payload) -> HandlerResult {
		let kind = payload.kind();
		let (records, check_existing) = self.records(&topic, payload);
		let count = records.len();
		let outcome = self.sink.accept(records, check_existing).await;
		if outcome.success {
			info!(
				topic = %topic,
				payload = kind,
				records = count,
				check_existing,
				message = %outcome.message,
				"Synced MQTT payload"
			);
			Ok(())
		} else {
			warn!(
				topic = %topic,
				payload = kind,
				records = count,
				message = %outcome.message,
				"Sink rejected MQTT payload"
			);
			Err(SinkRejected {
				topic: topic.to_string(),
				records: count,
				message: outcome.message,
			}
			.into())
		}
	}
}

/// A single string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
	One(String),
	Many(Vec<String>),
}

impl OneOrMany {
	fn into_vec(self) -> Vec<String> {
		match self {
			| OneOrMany::One(item) => vec![item],
			| OneOrMany::Many(items) => items,
		}
	}
}

/// Fetch configuration of one downstream target.
///
/// ```rust
/// use mqtt_connector_core::fetch::FetchParameters;
///
/// let params: FetchParameters = serde_json::from_str(
///     r#"{"topic": "sensors/+/temp", "topics": ["alerts/#"]}"#,
/// ).unwrap();
/// assert_eq!(params.topics(), ["sensors/+/temp", "alerts/#"]);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchParameters {
	#[serde(default)]
	pub topic: Option<OneOrMany>,
	#[serde(default)]
	pub topics: Option<OneOrMany>,
	/// Column receiving the receive time of scalar payloads
	#[serde(default)]
	pub datetime_column: Option<String>,
	/// Subscription QoS level (0, 1 or 2)
	#[serde(default)]
	pub qos: u8,
}

impl FetchParameters {
	/// `topic` entries followed by `topics` entries
	pub fn topics(&self) -> Vec<String> {
		let topic = self.topic.clone().map(OneOrMany::into_vec);
		let topics = self.topics.clone().map(OneOrMany::into_vec);
		topic.unwrap_or_default().into_iter().chain(topics.unwrap_or_default()).collect()
	}

	pub fn datetime_column(&self) -> &str {
		self.datetime_column
			.as_deref()
			.unwrap_or(DEFAULT_DATETIME_COLUMN)
	}

	pub fn qos(&self) -> Result<QoS, MqttConnectorError> {
		qos_level(self.qos)
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;
	use parking_lot::Mutex;
	use serde_json::json;

	use super::*;

	#[derive(Default)]
	struct MemorySink {
		calls: Mutex<Vec<(Vec<Value>, bool)>>,
		reject: bool,
	}

	#[async_trait]
	impl RecordSink for MemorySink {
		async fn accept(&self, records: Vec<Value>, check_existing: bool) -> SinkOutcome {
			self.calls.lock().push((records, check_existing));
			if self.reject {
				SinkOutcome::failed("duplicate key")
			} else {
				SinkOutcome::ok("stored")
			}
		}
	}

	fn adapter() -> FetchAdapter<MemorySink> {
		FetchAdapter::new(Arc::new(MemorySink::default()))
	}

	#[test]
	fn test_mapping_is_annotated_with_topic() {
		let payload = Payload::from_value(json!({"temp": 21}));
		let (records, check_existing) = adapter().records("sensors/1", payload);

		assert_eq!(records, [json!({"temp": 21, "topic": "sensors/1"})]);
		assert!(check_existing);
	}

	#[test]
	fn test_scalar_is_wrapped_with_timestamp() {
		let adapter = adapter().with_datetime_column("ts");
		let (records, check_existing) =
			adapter.records("sensors/1", Payload::from_value(json!(42)));

		assert!(!check_existing);
		let doc = records[0].as_object().unwrap();
		assert_eq!(doc["value"], json!(42));
		assert_eq!(doc["topic"], json!("sensors/1"));
		let ts = doc["ts"].as_str().unwrap();
		assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
		assert!(ts.ends_with('Z'));
	}

	#[test]
	fn test_string_scalar() {
		let (records, check_existing) =
			adapter().records("t", Payload::from_value(json!("on")));
		assert!(!check_existing);
		assert_eq!(records[0]["value"], json!("on"));
		assert!(records[0].get(DEFAULT_DATETIME_COLUMN).is_some());
	}

	#[test]
	fn test_other_payloads_pass_through() {
		let (records, check_existing) =
			adapter().records("t", Payload::from_value(json!([{"a": 1}, {"a": 2}])));
		assert_eq!(records, [json!({"a": 1}), json!({"a": 2})]);
		assert!(check_existing);

		let (records, _) = adapter().records("t", Payload::from_value(Value::Null));
		assert_eq!(records, [Value::Null]);

		let (records, _) =
			adapter().records("t", Payload::Bytes(Bytes::from_static(b"raw")));
		assert_eq!(records, [json!("raw")]);
	}

	#[tokio::test]
	async fn test_handle_forwards_to_sink() {
		let sink = Arc::new(MemorySink::default());
		let adapter = FetchAdapter::new(Arc::clone(&sink));

		adapter
			.handle(ArcStr::from("a/b"), Payload::from_value(json!({"x": 1})))
			.await
			.unwrap();

		let calls = sink.calls.lock();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0], (vec![json!({"x": 1, "topic": "a/b"})], true));
	}

	#[tokio::test]
	async fn test_failed_outcome_is_a_handler_error() {
		let sink = Arc::new(MemorySink {
			reject: true,
			..MemorySink::default()
		});
		let adapter = FetchAdapter::new(sink);

		let err = adapter
			.handle(ArcStr::from("a"), Payload::from_value(json!(1)))
			.await
			.unwrap_err();
		assert!(err.to_string().contains("duplicate key"));
	}

	#[test]
	fn test_parameters_merge_topic_and_topics() {
		let params: FetchParameters =
			serde_json::from_str(r#"{"topic": ["a", "b"], "topics": "c", "qos": 1}"#)
				.unwrap();
		assert_eq!(params.topics(), ["a", "b", "c"]);
		assert_eq!(params.qos().unwrap(), QoS::AtLeastOnce);
		assert_eq!(params.datetime_column(), "timestamp");

		let empty = FetchParameters::default();
		assert!(empty.topics().is_empty());

		let bad_qos = FetchParameters {
			qos: 3,
			..FetchParameters::default()
		};
		assert!(bad_qos.qos().is_err());
	}
}
