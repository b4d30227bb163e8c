//! # MQTT Connector
//!
//! Subscribes MQTT topic patterns and forwards matching messages to record
//! sinks or custom handlers. Publishing goes through a dedicated session
//! and reports a structured result.
//!
//! This crate re-exports [`mqtt_connector_core`]; see its documentation for
//! the topic matching rules and session lifecycle.
//!
//! ```rust,no_run
//! use mqtt_connector::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connector = MqttConnector::new(ConnectorConfig::localhost())?;
//!     connector.connect().await?;
//!     connector.shutdown().await
//! }
//! ```

pub use mqtt_connector_core::*;
