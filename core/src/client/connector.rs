use std::sync::Arc;

use bytes::Bytes;
use rumqttc::QoS;
use serde::Serialize;
use tracing::info;

use super::config::ConnectorConfig;
use super::error::MqttConnectorError;
use super::publisher::{PublishResult, Publisher};
use crate::connection::{
	ConnectionManager, RumqttcTransport, SessionKind, SessionState, Transport,
};
use crate::fetch::{FetchAdapter, FetchParameters, RecordSink};
use crate::routing::{
	DispatchPool, Dispatcher, MessageHandler, Subscription, SubscriptionRegistry,
};

/// Per-call subscription settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
	pub qos: QoS,
	/// Decode payloads as UTF-8 JSON before they reach the handler
	pub decode_payload: bool,
	/// Wait in `subscribe` until the subscribe session ends
	pub blocking: bool,
}

impl Default for SubscribeOptions {
	fn default() -> Self {
		Self {
			qos: QoS::AtMostOnce,
			decode_payload: true,
			blocking: false,
		}
	}
}

impl SubscribeOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	pub fn with_decode_payload(mut self, decode_payload: bool) -> Self {
		self.decode_payload = decode_payload;
		self
	}

	pub fn blocking(mut self, blocking: bool) -> Self {
		self.blocking = blocking;
		self
	}
}

/// MQTT connector: subscription registry, sessions, dispatch and publish.
///
/// Subscriptions live for the lifetime of the connector. Call
/// [`shutdown`](Self::shutdown) before dropping it.
#[derive(Debug)]
pub struct MqttConnector {
	config: Arc<ConnectorConfig>,
	manager: Arc<ConnectionManager>,
	publisher: Publisher,
}

impl MqttConnector {
	/// Creates a connector that reaches the broker through `rumqttc`.
	pub fn new(config: ConnectorConfig) -> Result<Self, MqttConnectorError> {
		config.validate()?;
		let config = Arc::new(config);
		let transport = Arc::new(RumqttcTransport::new(Arc::clone(&config)));
		Ok(Self::assemble(config, transport))
	}

	/// Creates a connector on a custom transport.
	pub fn with_transport(
		config: ConnectorConfig,
		transport: impl Transport,
	) -> Result<Self, MqttConnectorError> {
		config.validate()?;
		Ok(Self::assemble(Arc::new(config), Arc::new(transport)))
	}

	fn assemble(config: Arc<ConnectorConfig>, transport: Arc<dyn Transport>) -> Self {
		let settings = &config.settings;
		let pool = DispatchPool::new(
			settings.max_concurrent_callbacks,
			settings.dispatch_queue_capacity,
			settings.backpressure,
		);
		let dispatcher = Dispatcher::new(Arc::new(SubscriptionRegistry::new()), pool);
		let manager = Arc::new(ConnectionManager::new(
			Arc::clone(&config),
			transport,
			dispatcher,
		));
		let publisher = Publisher::new(Arc::clone(&manager));
		Self {
			config,
			manager,
			publisher,
		}
	}

	pub fn config(&self) -> &ConnectorConfig {
		&self.config
	}

	pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
		self.manager.registry()
	}

	pub fn connection(&self) -> &ConnectionManager {
		&self.manager
	}

	pub fn session_state(&self, kind: SessionKind) -> SessionState {
		self.manager.session_state(kind)
	}

	/// Registers `handler` for `pattern` and makes sure the broker knows.
	///
	/// Registering a pattern again replaces its handler and settings. The
	/// entry is registered before connecting, so if the initial connect
	/// fails the error is returned but the pattern is still subscribed on
	/// the next successful connect.
	pub async fn subscribe(
		&self,
		pattern: &str,
		handler: Arc<dyn MessageHandler>,
		options: SubscribeOptions,
	) -> Result<(), MqttConnectorError> {
		let subscription = self.manager.registry().register(
			pattern,
			options.qos,
			handler,
			options.decode_payload,
		)?;
		self.activate(&[subscription]).await?;
		info!(
			pattern,
			qos = ?options.qos,
			decode_payload = options.decode_payload,
			"Subscribed to topic pattern"
		);
		if options.blocking {
			self.manager.wait_subscribe_session().await;
		}
		Ok(())
	}

	async fn activate(
		&self,
		subscriptions: &[Arc<Subscription>],
	) -> Result<(), MqttConnectorError> {
		// a fresh session subscribes every registered pattern on its own
		if self.manager.ensure_subscribe_session().await? {
			return Ok(());
		}
		for subscription in subscriptions {
			self.manager.subscribe_pattern(subscription).await?;
		}
		Ok(())
	}

	/// Encodes `payload` as JSON and publishes it on a fresh publish session.
	pub async fn publish<T>(&self, topic: &str, payload: &T, qos: QoS) -> PublishResult
	where T: Serialize + ?Sized {
		self.publisher.publish(topic, payload, qos).await
	}

	/// Publishes `payload` without encoding.
	pub async fn publish_bytes(
		&self,
		topic: &str,
		payload: impl Into<Bytes>,
		qos: QoS,
	) -> PublishResult {
		self.publisher.publish_bytes(topic, payload.into(), qos).await
	}

	/// Connects the general session, e.g. to verify host and credentials.
	pub async fn connect(&self) -> Result<(), MqttConnectorError> {
		self.manager.connect_general().await?;
		Ok(())
	}

	/// Subscribes every topic named in `params` with one shared
	/// [`FetchAdapter`] feeding `sink`. Returns the number of topics.
	pub async fn fetch<S: RecordSink>(
		&self,
		sink: Arc<S>,
		params: &FetchParameters,
	) -> Result<usize, MqttConnectorError> {
		let topics = params.topics();
		if topics.is_empty() {
			return Err(MqttConnectorError::ConfigurationValue(
				"fetch parameters must name at least one topic".to_string(),
			));
		}
		let qos = params.qos()?;
		let adapter: Arc<dyn MessageHandler> = Arc::new(
			FetchAdapter::new(sink).with_datetime_column(params.datetime_column()),
		);

		let mut subscriptions = Vec::with_capacity(topics.len());
		for topic in &topics {
			subscriptions.push(self.manager.registry().register(
				topic.as_str(),
				qos,
				Arc::clone(&adapter),
				true,
			)?);
		}
		self.activate(&subscriptions).await?;
		info!(topics = ?topics, qos = ?qos, "Fetching MQTT topics");
		Ok(topics.len())
	}

	/// Disconnects every session and waits for in-flight handlers.
	pub async fn shutdown(self) -> Result<(), MqttConnectorError> {
		self.manager.shutdown().await;
		Ok(())
	}
}
