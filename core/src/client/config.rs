//! Configuration for MQTT connector initialization

use std::time::Duration;

use rumqttc::QoS;
use serde::Deserialize;

use crate::MqttConnectorError;
use crate::routing::BackpressurePolicy;

/// Wire transport used to reach the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
	/// Plain TCP
	#[default]
	Tcp,
	/// MQTT over WebSocket
	#[serde(alias = "websocket", alias = "ws")]
	Websockets,
}

/// Client-level performance and behavior settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
	/// Capacity of each session's request channel
	pub event_loop_capacity: usize,
	/// How long a connect attempt may take before it fails
	pub connection_timeout_millis: u64,
	/// Upper bound on concurrently running message handlers
	pub max_concurrent_callbacks: usize,
	/// Messages accepted for dispatch while every handler slot is busy
	pub dispatch_queue_capacity: usize,
	/// What dispatch does when the handler slots and the queue are full
	pub backpressure: BackpressurePolicy,
	/// Consecutive subscribe-session errors before its loop gives up
	pub max_consecutive_errors: u32,
	/// First reconnect delay of the subscribe session
	pub initial_retry_delay_millis: u64,
	/// Cap for the exponential reconnect delay
	pub max_retry_delay_millis: u64,
	/// How long shutdown waits for in-flight handlers
	pub shutdown_timeout_millis: u64,
}

impl Default for ClientSettings {
	fn default() -> Self {
		Self {
			event_loop_capacity: 10,
			connection_timeout_millis: 5_000,
			max_concurrent_callbacks: std::thread::available_parallelism()
				.map(|n| n.get())
				.unwrap_or(4),
			dispatch_queue_capacity: 64,
			backpressure: BackpressurePolicy::Block,
			max_consecutive_errors: 10,
			initial_retry_delay_millis: 100,
			max_retry_delay_millis: 30_000,
			shutdown_timeout_millis: 2_000,
		}
	}
}

impl ClientSettings {
	pub fn connection_timeout(&self) -> Duration {
		Duration::from_millis(self.connection_timeout_millis)
	}

	pub fn initial_retry_delay(&self) -> Duration {
		Duration::from_millis(self.initial_retry_delay_millis)
	}

	pub fn max_retry_delay(&self) -> Duration {
		Duration::from_millis(self.max_retry_delay_millis)
	}

	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_millis(self.shutdown_timeout_millis)
	}
}

/// Connector configuration as resolved from host configuration.
///
/// Only `host` is required:
///
/// ```rust
/// use mqtt_connector_core::ConnectorConfig;
///
/// let config: ConnectorConfig =
///     serde_json::from_str(r#"{"host": "broker.local"}"#).unwrap();
/// assert_eq!(config.port, 1883);
/// assert_eq!(config.keepalive, 60);
/// assert!(config.clean_session);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
	/// Broker host name or address
	pub host: String,
	/// Broker port
	#[serde(default = "ConnectorConfig::default_port")]
	pub port: u16,
	/// Keep-alive interval in seconds
	#[serde(default = "ConnectorConfig::default_keepalive")]
	pub keepalive: u64,
	/// Wire transport
	#[serde(default)]
	pub transport: TransportKind,
	/// Whether the broker should discard session state on connect
	#[serde(default = "ConnectorConfig::default_clean_session")]
	pub clean_session: bool,
	/// Optional user name, used together with `password`
	#[serde(default)]
	pub username: Option<String>,
	/// Optional password, used together with `username`
	#[serde(default)]
	pub password: Option<String>,
	/// Prefix for the per-session client identifiers
	#[serde(default = "ConnectorConfig::default_client_id")]
	pub client_id: String,
	/// Client-level settings
	#[serde(default)]
	pub settings: ClientSettings,
}

impl ConnectorConfig {
	pub const DEFAULT_PORT: u16 = 1883;
	pub const DEFAULT_KEEPALIVE: u64 = 60;
	pub const DEFAULT_CLEAN_SESSION: bool = true;
	pub const DEFAULT_CLIENT_ID: &'static str = "mqtt-connector";
	/// Shortest keep-alive accepted by the underlying client
	pub const MIN_KEEPALIVE: u64 = 5;

	fn default_port() -> u16 {
		Self::DEFAULT_PORT
	}

	fn default_keepalive() -> u64 {
		Self::DEFAULT_KEEPALIVE
	}

	fn default_clean_session() -> bool {
		Self::DEFAULT_CLEAN_SESSION
	}

	fn default_client_id() -> String {
		Self::DEFAULT_CLIENT_ID.to_string()
	}

	/// Create config with default settings for `host`
	pub fn new(host: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			port: Self::DEFAULT_PORT,
			keepalive: Self::DEFAULT_KEEPALIVE,
			transport: TransportKind::default(),
			clean_session: Self::DEFAULT_CLEAN_SESSION,
			username: None,
			password: None,
			client_id: Self::default_client_id(),
			settings: ClientSettings::default(),
		}
	}

	/// Create config for localhost:1883
	pub fn localhost() -> Self {
		Self::new("localhost")
	}

	pub fn with_port(mut self, port: u16) -> Self {
		self.port = port;
		self
	}

	pub fn with_keepalive(mut self, keepalive_secs: u64) -> Self {
		self.keepalive = keepalive_secs;
		self
	}

	pub fn with_transport(mut self, transport: TransportKind) -> Self {
		self.transport = transport;
		self
	}

	pub fn with_clean_session(mut self, clean_session: bool) -> Self {
		self.clean_session = clean_session;
		self
	}

	pub fn with_credentials(
		mut self,
		username: impl Into<String>,
		password: impl Into<String>,
	) -> Self {
		self.username = Some(username.into());
		self.password = Some(password.into());
		self
	}

	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = client_id.into();
		self
	}

	pub fn with_settings(mut self, settings: ClientSettings) -> Self {
		self.settings = settings;
		self
	}

	pub fn keepalive_duration(&self) -> Duration {
		Duration::from_secs(self.keepalive)
	}

	/// Credentials, only when both halves are present.
	pub fn credentials(&self) -> Option<(&str, &str)> {
		match (&self.username, &self.password) {
			| (Some(username), Some(password)) => {
				Some((username.as_str(), password.as_str()))
			}
			| _ => None,
		}
	}

	/// Checks values the broker client would otherwise reject at runtime.
	pub fn validate(&self) -> Result<(), MqttConnectorError> {
		if self.host.trim().is_empty() {
			return Err(MqttConnectorError::ConfigurationValue(
				"host must not be empty".to_string(),
			));
		}
		if self.port == 0 {
			return Err(MqttConnectorError::ConfigurationValue(
				"port must be greater than 0".to_string(),
			));
		}
		if self.keepalive < Self::MIN_KEEPALIVE {
			return Err(MqttConnectorError::ConfigurationValue(format!(
				"keepalive must be at least {} seconds",
				Self::MIN_KEEPALIVE
			)));
		}
		if self.username.is_some() != self.password.is_some() {
			return Err(MqttConnectorError::ConfigurationValue(
				"username and password must be set together".to_string(),
			));
		}
		if self.client_id.is_empty() {
			return Err(MqttConnectorError::ConfigurationValue(
				"client_id must not be empty".to_string(),
			));
		}
		let settings = &self.settings;
		if settings.event_loop_capacity == 0
			|| settings.max_concurrent_callbacks == 0
		{
			return Err(MqttConnectorError::ConfigurationValue(
				"event_loop_capacity and max_concurrent_callbacks must be \
				 greater than 0"
					.to_string(),
			));
		}
		if settings.connection_timeout_millis == 0 {
			return Err(MqttConnectorError::ConfigurationValue(
				"connection_timeout_millis must be greater than 0".to_string(),
			));
		}
		Ok(())
	}
}

/// Maps a numeric QoS level to [`QoS`].
pub fn qos_level(level: u8) -> Result<QoS, MqttConnectorError> {
	match level {
		| 0 => Ok(QoS::AtMostOnce),
		| 1 => Ok(QoS::AtLeastOnce),
		| 2 => Ok(QoS::ExactlyOnce),
		| other => Err(MqttConnectorError::ConfigurationValue(format!(
			"QoS level must be 0, 1 or 2, got {other}"
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_from_minimal_json() {
		let config: ConnectorConfig =
			serde_json::from_str(r#"{"host": "broker"}"#).unwrap();

		assert_eq!(config.port, 1883);
		assert_eq!(config.keepalive, 60);
		assert_eq!(config.transport, TransportKind::Tcp);
		assert!(config.clean_session);
		assert_eq!(config.credentials(), None);
		assert_eq!(config.client_id, "mqtt-connector");
		assert_eq!(config.settings.max_consecutive_errors, 10);
		config.validate().unwrap();
	}

	#[test]
	fn test_full_json() {
		let config: ConnectorConfig = serde_json::from_str(
			r#"{
				"host": "broker",
				"port": 9001,
				"keepalive": 30,
				"transport": "websockets",
				"clean_session": false,
				"username": "u",
				"password": "p",
				"settings": {"backpressure": "drop", "max_concurrent_callbacks": 2}
			}"#,
		)
		.unwrap();

		assert_eq!(config.port, 9001);
		assert_eq!(config.transport, TransportKind::Websockets);
		assert!(!config.clean_session);
		assert_eq!(config.credentials(), Some(("u", "p")));
		assert_eq!(config.settings.backpressure, BackpressurePolicy::Drop);
		assert_eq!(config.settings.max_concurrent_callbacks, 2);
		assert_eq!(config.settings.event_loop_capacity, 10);
		assert_eq!(config.settings.dispatch_queue_capacity, 64);
	}

	#[test]
	fn test_missing_host_is_rejected() {
		assert!(serde_json::from_str::<ConnectorConfig>(r#"{"port": 1}"#).is_err());
	}

	#[test]
	fn test_qos_levels() {
		assert_eq!(qos_level(0).unwrap(), QoS::AtMostOnce);
		assert_eq!(qos_level(2).unwrap(), QoS::ExactlyOnce);
		assert!(qos_level(3).is_err());
	}

	#[test]
	fn test_validate_rejects_bad_values() {
		assert!(ConnectorConfig::new("").validate().is_err());
		assert!(ConnectorConfig::new("h").with_port(0).validate().is_err());
		assert!(ConnectorConfig::new("h").with_keepalive(1).validate().is_err());

		let mut half_credentials = ConnectorConfig::new("h");
		half_credentials.username = Some("user".to_string());
		assert!(half_credentials.validate().is_err());

		let mut settings = ClientSettings::default();
		settings.max_concurrent_callbacks = 0;
		assert!(ConnectorConfig::new("h").with_settings(settings).validate().is_err());
	}
}
