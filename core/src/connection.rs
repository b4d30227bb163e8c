//! MQTT connection management module
//!
//! A connector talks to the broker over three independent sessions. Each
//! session has its own link, client identifier and state machine; the
//! [`ConnectionManager`] owns all three and keeps the subscribe session
//! alive in the background.

pub mod error;
pub mod manager;
pub mod rumqttc_transport;
pub mod session;
pub mod transport;

pub use error::ConnectError;
pub use manager::ConnectionManager;
pub use rumqttc_transport::RumqttcTransport;
pub use session::{Session, SessionState};
pub use transport::{
	CONNACK_NOT_AUTHORIZED, CONNACK_SUCCESS, SessionClient, SessionEvent,
	SessionEventLoop, SessionKind, SessionLink, Transport, TransportError,
};

#[cfg(test)]
mod manager_tests;
