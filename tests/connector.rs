//! End-to-end behavior of the public API against the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mqtt_connector::connection::SessionKind;
use mqtt_connector::fetch::FetchParameters;
use mqtt_connector::testing::{InMemoryBroker, eventually};
use mqtt_connector::{
	ClientSettings, ConnectorConfig, MqttConnector, Payload, PublishFailure, QoS,
	RecordSink, SinkOutcome, SubscribeOptions, handler_fn,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

const WAIT: Duration = Duration::from_secs(2);

fn connector(broker: &InMemoryBroker) -> MqttConnector {
	let settings = ClientSettings {
		connection_timeout_millis: 200,
		initial_retry_delay_millis: 1,
		max_retry_delay_millis: 5,
		shutdown_timeout_millis: 500,
		..ClientSettings::default()
	};
	let config = ConnectorConfig::new("broker.test")
		.with_client_id("it")
		.with_settings(settings);
	MqttConnector::with_transport(config, broker.clone()).unwrap()
}

#[derive(Default)]
struct TableSink {
	batches: Mutex<Vec<(Vec<Value>, bool)>>,
}

#[async_trait]
impl RecordSink for TableSink {
	async fn accept(&self, records: Vec<Value>, check_existing: bool) -> SinkOutcome {
		let count = records.len();
		self.batches.lock().push((records, check_existing));
		SinkOutcome::ok(format!("stored {count}"))
	}
}

#[tokio::test]
async fn test_fetch_feeds_sink_across_reconnects() {
	let broker = InMemoryBroker::new();
	let connector = connector(&broker);
	let sink = Arc::new(TableSink::default());
	let params: FetchParameters = serde_json::from_value(json!({
		"topic": "plant/+/temperature",
		"topics": ["plant/alarms/#"],
		"qos": 1
	}))
	.unwrap();

	assert_eq!(connector.fetch(Arc::clone(&sink), &params).await.unwrap(), 2);
	let expected = [
		("plant/+/temperature".to_string(), QoS::AtLeastOnce),
		("plant/alarms/#".to_string(), QoS::AtLeastOnce),
	];
	assert!(
		eventually(WAIT, || broker.subscriptions(SessionKind::Subscribe) == expected)
			.await
	);

	assert_eq!(
		broker.deliver("plant/line1/temperature", "21.5", QoS::AtLeastOnce),
		1
	);
	assert!(eventually(WAIT, || sink.batches.lock().len() == 1).await);

	broker.drop_connections(SessionKind::Subscribe);
	assert!(
		eventually(WAIT, || {
			broker.subscriptions(SessionKind::Subscribe).len() == 2
		})
		.await
	);

	broker.deliver(
		"plant/alarms/line1/overheat",
		r#"{"level": "high"}"#,
		QoS::AtLeastOnce,
	);
	assert!(eventually(WAIT, || sink.batches.lock().len() == 2).await);

	let batches = sink.batches.lock().clone();
	let scalar = batches[0].0[0].as_object().unwrap();
	assert_eq!(scalar["value"], json!(21.5));
	assert_eq!(scalar["topic"], json!("plant/line1/temperature"));
	assert!(scalar.contains_key("timestamp"));
	assert!(!batches[0].1);
	assert_eq!(batches[1], (
		vec![json!({"level": "high", "topic": "plant/alarms/line1/overheat"})],
		true
	));

	connector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publish_and_subscribe_use_separate_sessions() {
	let broker = InMemoryBroker::new();
	let connector = connector(&broker);
	let seen: Arc<Mutex<Vec<Payload>>> = Arc::default();
	let recorded = Arc::clone(&seen);
	let handler = handler_fn(move |_topic, payload| {
		let recorded = Arc::clone(&recorded);
		async move {
			recorded.lock().push(payload);
			Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
		}
	});

	connector
		.subscribe("echo/#", Arc::new(handler), SubscribeOptions::new())
		.await
		.unwrap();

	let result = connector.publish("echo/1", &json!({"n": 1}), QoS::AtMostOnce).await;
	assert!(result.is_success(), "{result}");
	assert_eq!(
		result.detail,
		format!(
			"Successfully published message '{}' on topic 'echo/1'.",
			result.message_id.unwrap()
		)
	);

	let ids = broker.client_ids();
	assert!(ids.iter().any(|(kind, id)| *kind == SessionKind::Subscribe
		&& id.starts_with("it-subscribe-")));
	assert!(ids.iter().any(|(kind, id)| *kind == SessionKind::Publish
		&& id.starts_with("it-publish-")));

	// the in-memory broker does not loop publishes back
	assert!(
		eventually(WAIT, || !broker.subscriptions(SessionKind::Subscribe).is_empty())
			.await
	);
	broker.deliver("echo/1", r#"{"n": 1}"#, QoS::AtMostOnce);
	assert!(eventually(WAIT, || seen.lock().len() == 1).await);
	assert_eq!(seen.lock()[0], Payload::from_value(json!({"n": 1})));

	connector.shutdown().await.unwrap();
	assert!(!broker.is_connected(SessionKind::Subscribe));
}

#[tokio::test]
async fn test_publish_failure_is_reported_not_raised() {
	let broker = InMemoryBroker::new();
	broker.fail_publishes(Some("queue full"));
	let connector = connector(&broker);

	let result = connector.publish("out", &1, QoS::AtLeastOnce).await;
	assert!(!result.success);
	assert_eq!(result.failure, Some(PublishFailure::Publish));
	assert!(result.detail.starts_with("publish error: "), "{}", result.detail);

	connector.shutdown().await.unwrap();
}
