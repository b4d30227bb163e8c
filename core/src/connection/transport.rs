//! Transport seam between the connection manager and a broker client.
//!
//! The shape mirrors `rumqttc`: a cloneable request half
//! ([`SessionClient`]) and an event loop ([`SessionEventLoop`]) that must be
//! polled for anything to happen on the wire.

use std::fmt::{self, Display};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use thiserror::Error;

use crate::routing::InboundMessage;

/// CONNACK return code for a successful connection.
pub const CONNACK_SUCCESS: u8 = 0;
/// CONNACK return code conventionally meaning "not authorized".
pub const CONNACK_NOT_AUTHORIZED: u8 = 5;

/// One of the three independent broker sessions owned by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionKind {
	/// General-purpose session (connectivity checks)
	General,
	/// Session used only for publishing, reconnected on every publish
	Publish,
	/// Session used only for subscriptions, kept alive by a background loop
	Subscribe,
}

impl SessionKind {
	pub const ALL: [SessionKind; 3] =
		[SessionKind::General, SessionKind::Publish, SessionKind::Subscribe];

	pub fn as_str(&self) -> &'static str {
		match self {
			| SessionKind::General => "general",
			| SessionKind::Publish => "publish",
			| SessionKind::Subscribe => "subscribe",
		}
	}
}

impl Display for SessionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Event produced by polling a session's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	/// Broker answered a connect attempt
	ConnAck { code: u8, session_present: bool },
	/// Broker delivered a message on a subscribed topic
	Message(InboundMessage),
	/// A publish left the client; `pkid` is 0 for QoS 0
	PublishSent { pkid: u16 },
	/// QoS 1 acknowledgement
	PubAck { pkid: u16, code: u8 },
	/// QoS 2 completion
	PubComp { pkid: u16, code: u8 },
	/// Either side sent DISCONNECT
	Disconnected,
	/// Anything the connection manager does not act on
	Other,
}

/// Transport-level failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	/// Network or protocol error on the event loop
	#[error("connection error: {0}")]
	Connection(String),
	/// Request could not be queued on the client
	#[error("client request failed: {0}")]
	Request(String),
	/// Event loop is gone
	#[error("session closed")]
	Closed,
}

/// Request half of a session.
#[async_trait]
pub trait SessionClient: Send + Sync + 'static {
	async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError>;

	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
	) -> Result<(), TransportError>;

	async fn disconnect(&self) -> Result<(), TransportError>;

	/// Non-async disconnect request, usable from `Drop`.
	fn try_disconnect(&self) -> Result<(), TransportError>;
}

/// Event half of a session.
#[async_trait]
pub trait SessionEventLoop: Send + 'static {
	/// Drives the connection and returns the next event.
	///
	/// After an error the next call attempts to reconnect.
	async fn poll(&mut self) -> Result<SessionEvent, TransportError>;
}

/// A freshly opened, not yet connected session link.
pub struct SessionLink {
	pub client: Arc<dyn SessionClient>,
	pub event_loop: Box<dyn SessionEventLoop>,
}

impl std::fmt::Debug for SessionLink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionLink").finish_non_exhaustive()
	}
}

/// Factory for session links.
pub trait Transport: Send + Sync + 'static {
	/// Creates a new link for `kind`. No network traffic happens until the
	/// event loop is polled.
	fn open(&self, kind: SessionKind, client_id: &str) -> SessionLink;
}
