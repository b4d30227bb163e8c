//! # MQTT Connector
//!
//! Bridges an MQTT broker to a downstream record sink: subscribes to topic
//! patterns, matches incoming messages against them, decodes payloads and
//! dispatches them to handlers on a bounded worker pool. Publishing goes
//! through its own session with a structured result.
//!
//! ## Features
//!
//! - **Segment-based wildcard matching**: `+` (one level) and `#` (trailing levels)
//! - **Subscription registry**: one entry per pattern, last registration wins
//! - **Resubscription on reconnect**: the broker always sees the full registry
//! - **Isolated dispatch**: decode failures, handler errors and panics stay
//!   with the subscription that caused them
//! - **Independent sessions**: general, publish and subscribe never share a link
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mqtt_connector_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connector = MqttConnector::new(ConnectorConfig::new("broker.local"))?;
//!
//!     let handler = handler_fn(|topic, payload| async move {
//!         println!("{topic}: {payload:?}");
//!         Ok::<(), HandlerError>(())
//!     });
//!     connector
//!         .subscribe("sensors/+/temp", Arc::new(handler), SubscribeOptions::new())
//!         .await?;
//!
//!     let result = connector
//!         .publish("sensors/1/temp", &21.5, QoS::AtLeastOnce)
//!         .await;
//!     println!("{}", result.detail);
//!
//!     connector.shutdown().await
//! }
//! ```
//!
//! ## Pattern Matching
//!
//! - `+` matches exactly one non-empty level (`sensors/+/temp`)
//! - `#` matches one or more trailing levels and must come last (`sensors/#`);
//!   it does not match the parent topic itself
//!
//! A level is a wildcard only when it is exactly `+` or `#`; `a+b` is literal.

#![warn(missing_debug_implementations)]

// Core modules
pub mod client;
pub mod connection;
pub mod fetch;
pub mod payload;
pub mod routing;
pub mod topic;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// === Core Public API ===
pub use client::{
	ClientSettings, ConnectorConfig, MqttConnector, MqttConnectorError,
	PublishFailure, PublishResult, SubscribeOptions, TransportKind,
};
pub use connection::{SessionKind, SessionState};
pub use fetch::{FetchAdapter, FetchParameters, RecordSink, SinkOutcome};
pub use payload::Payload;
pub use routing::{
	BackpressurePolicy, HandlerError, HandlerResult, MessageHandler, handler_fn,
};
// Essential external types
pub use rumqttc::QoS;
pub use topic::{TopicError, TopicPatternError, TopicPatternPath};

/// Result type alias for operations that may fail with MqttConnectorError
pub type Result<T> = std::result::Result<T, MqttConnectorError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_connector_core::prelude::*;
/// ```
pub mod prelude {
	pub use crate::{
		ConnectorConfig, HandlerError, MessageHandler, MqttConnector,
		MqttConnectorError, Payload, PublishResult, QoS, Result,
		SubscribeOptions, handler_fn,
	};
}

/// Types for custom transports and lower-level wiring
///
/// ```rust
/// use mqtt_connector_core::advanced::*;
/// ```
pub mod advanced {
	pub use crate::connection::{
		ConnectionManager, RumqttcTransport, SessionClient, SessionEvent,
		SessionEventLoop, SessionLink, Transport,
	};
	pub use crate::routing::{
		DispatchPool, DispatchReport, Dispatcher, InboundMessage, Subscription,
		SubscriptionRegistry,
	};
	pub use crate::topic::{limits, validation};
}

/// Error types used throughout the library
///
/// ```rust
/// use mqtt_connector_core::errors::*;
/// ```
pub mod errors {
	pub use crate::client::PublishError;
	pub use crate::connection::{ConnectError, TransportError};
	pub use crate::fetch::SinkRejected;
	pub use crate::payload::{DecodeError, EncodeError};
	pub use crate::routing::SubscriptionError;
	pub use crate::{MqttConnectorError, TopicError, TopicPatternError};
}
