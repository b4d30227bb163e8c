//! MQTT connector module
//!
//! This module provides the high-level connector: configuration, the
//! subscribe/publish/fetch surface and the publisher.

pub mod config;
pub mod connector;
/// Connector error types
pub mod error;
/// Connect-per-call publishing with structured results
pub mod publisher;


// Re-export commonly used types for convenience
pub use config::{ClientSettings, ConnectorConfig, TransportKind, qos_level};
pub use connector::{MqttConnector, SubscribeOptions};
pub use error::MqttConnectorError;
pub use publisher::{PublishError, PublishFailure, PublishResult, Publisher};
