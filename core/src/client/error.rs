use crate::client::publisher::PublishError;
use crate::connection::ConnectError;
use crate::payload::EncodeError;
use crate::routing::SubscriptionError;
use crate::topic::{TopicError, TopicPatternError};

/// Errors that can occur in MQTT connector operations
#[derive(Debug, thiserror::Error)]
pub enum MqttConnectorError {
	/// Invalid configuration parameter values
	#[error("Invalid configuration value: {0}")]
	ConfigurationValue(String),

	/// Topic pattern errors
	#[error("Topic pattern error: {0}")]
	TopicPattern(#[from] TopicPatternError),

	/// Concrete topic errors
	#[error("Topic error: {0}")]
	Topic(#[from] TopicError),

	/// Subscription management errors
	#[error("Subscription error: {0}")]
	Subscription(#[from] SubscriptionError),

	/// Session connect failed
	#[error("Failed to establish connection: {0}")]
	Connect(#[from] ConnectError),

	/// Payload could not be serialized
	#[error("Serialization error: {0}")]
	Encode(#[from] EncodeError),

	/// Publish did not complete
	#[error("Publish failed: {0}")]
	Publish(#[from] PublishError),
}

impl From<std::convert::Infallible> for MqttConnectorError {
	fn from(never: std::convert::Infallible) -> Self {
		match never {}
	}
}
