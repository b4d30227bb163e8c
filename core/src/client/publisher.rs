use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rumqttc::QoS;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::connection::{
	ConnectError, ConnectionManager, SessionClient, SessionEvent,
	SessionEventLoop, SessionKind, SessionLink, TransportError,
};
use crate::payload::{self, EncodeError};
use crate::topic::{TopicError, validation};

/// Why a publish did not succeed
#[derive(Debug, Error)]
pub enum PublishError {
	#[error("{0}")]
	InvalidTopic(#[from] TopicError),

	#[error("{0}")]
	Encode(#[from] EncodeError),

	#[error("{0}")]
	Connect(#[from] ConnectError),

	#[error("{0}")]
	Transport(#[from] TransportError),

	#[error("no acknowledgement within {timeout_millis}ms")]
	NoAcknowledgement { timeout_millis: u64 },

	#[error("broker returned code {code} for message {message_id}")]
	Rejected { code: u8, message_id: u16 },
}

impl PublishError {
	/// Step at which the publish failed
	pub fn failure(&self) -> PublishFailure {
		match self {
			| PublishError::Encode(_) => PublishFailure::Encode,
			| PublishError::Connect(_) => PublishFailure::Connect,
			| PublishError::Rejected { code, .. } => {
				PublishFailure::Rejected { code: *code }
			}
			| PublishError::InvalidTopic(_)
			| PublishError::Transport(_)
			| PublishError::NoAcknowledgement { .. } => PublishFailure::Publish,
		}
	}
}

/// Step of the publish sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailure {
	/// Payload could not be serialized; nothing was sent
	Encode,
	/// Publish session could not connect; nothing was published
	Connect,
	/// Publish request failed or was not acknowledged
	Publish,
	/// Broker acknowledged with a non-zero code
	Rejected { code: u8 },
}

impl PublishFailure {
	fn prefix(&self) -> &'static str {
		match self {
			| PublishFailure::Encode => "encode error",
			| PublishFailure::Connect => "connect error",
			| PublishFailure::Publish | PublishFailure::Rejected { .. } => {
				"publish error"
			}
		}
	}
}

/// Structured outcome of a publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
	pub success: bool,
	/// Packet identifier of the message; `0` for QoS 0
	pub message_id: Option<u16>,
	/// Human-readable outcome, prefixed with the failed step on failure
	pub detail: String,
	pub failure: Option<PublishFailure>,
}

impl PublishResult {
	pub fn published(topic: &str, message_id: u16) -> Self {
		Self {
			success: true,
			message_id: Some(message_id),
			detail: format!(
				"Successfully published message '{message_id}' on topic '{topic}'."
			),
			failure: None,
		}
	}

	pub fn failed(error: &PublishError) -> Self {
		let failure = error.failure();
		let message_id = match error {
			| PublishError::Rejected { message_id, .. } => Some(*message_id),
			| _ => None,
		};
		Self {
			success: false,
			message_id,
			detail: format!("{}: {error}", failure.prefix()),
			failure: Some(failure),
		}
	}

	pub fn is_success(&self) -> bool {
		self.success
	}
}

impl fmt::Display for PublishResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.detail)
	}
}

/// Publishes over the publish session, connecting afresh for every call.
///
/// Calls are serialized: the publish session carries at most one message at
/// a time and is disconnected again before the next call starts.
pub struct Publisher {
	manager: Arc<ConnectionManager>,
	session: Mutex<()>,
}

impl Publisher {
	pub fn new(manager: Arc<ConnectionManager>) -> Self {
		Self {
			manager,
			session: Mutex::new(()),
		}
	}

	/// Encodes `payload` as JSON and publishes it.
	///
	/// An encoding failure is reported without connecting.
	pub async fn publish<T>(&self, topic: &str, payload: &T, qos: QoS) -> PublishResult
	where T: Serialize + ?Sized {
		match payload::encode_json(payload) {
			| Ok(bytes) => self.publish_bytes(topic, bytes, qos).await,
			| Err(err) => report(topic, PublishError::from(err)),
		}
	}

	/// Publishes `payload` unchanged.
	pub async fn publish_bytes(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
	) -> PublishResult {
		match self.send(topic, payload, qos).await {
			| Ok(message_id) => {
				debug!(topic, message_id, qos = ?qos, "Published MQTT message");
				PublishResult::published(topic, message_id)
			}
			| Err(err) => report(topic, err),
		}
	}

	/// Connects the publish session, publishes and waits for the broker's
	/// acknowledgement. Returns the message's packet identifier.
	pub async fn send(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
	) -> Result<u16, PublishError> {
		validation::validate_publish_topic(topic)?;
		let _session = self.session.lock().await;

		let SessionLink {
			client,
			mut event_loop,
		} = self.manager.establish(SessionKind::Publish).await?;
		let outcome = self
			.publish_on(client.as_ref(), event_loop.as_mut(), topic, payload, qos)
			.await;
		self.close(client.as_ref(), event_loop.as_mut()).await;
		outcome
	}

	async fn publish_on(
		&self,
		client: &dyn SessionClient,
		event_loop: &mut dyn SessionEventLoop,
		topic: &str,
		payload: Bytes,
		qos: QoS,
	) -> Result<u16, PublishError> {
		client.publish(topic, payload, qos).await?;
		let settings = &self.manager.config().settings;
		let timeout_millis = settings.connection_timeout_millis;
		tokio::time::timeout(
			settings.connection_timeout(),
			await_acknowledgement(event_loop, qos),
		)
		.await
		.map_err(|_| PublishError::NoAcknowledgement { timeout_millis })?
	}

	/// Sends DISCONNECT and polls until it leaves, so the next call starts
	/// from a clean session.
	async fn close(
		&self,
		client: &dyn SessionClient,
		event_loop: &mut dyn SessionEventLoop,
	) {
		match client.disconnect().await {
			| Ok(()) => {
				let flushed = tokio::time::timeout(
					self.manager.config().settings.shutdown_timeout(),
					async {
						loop {
							match event_loop.poll().await {
								| Ok(SessionEvent::Disconnected) | Err(_) => break,
								| Ok(event) => {
									trace!(event = ?event, "Publish session event")
								}
							}
						}
					},
				)
				.await;
				if flushed.is_err() {
					debug!("Publish session disconnect was not confirmed");
				}
			}
			| Err(err) => {
				debug!(error = %err, "Failed to disconnect publish session");
			}
		}
		self.manager.release(SessionKind::Publish);
	}
}

impl fmt::Debug for Publisher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Publisher").finish_non_exhaustive()
	}
}

fn report(topic: &str, error: PublishError) -> PublishResult {
	let result = PublishResult::failed(&error);
	warn!(topic, failure = ?result.failure, error = %error, "MQTT publish failed");
	result
}

/// Polls until the publish is confirmed: sent for QoS 0, PUBACK for QoS 1,
/// PUBCOMP for QoS 2.
async fn await_acknowledgement(
	event_loop: &mut dyn SessionEventLoop,
	qos: QoS,
) -> Result<u16, PublishError> {
	loop {
		match event_loop.poll().await? {
			| SessionEvent::PublishSent { pkid } if qos == QoS::AtMostOnce => {
				return Ok(pkid);
			}
			| SessionEvent::PubAck { pkid, code } if qos == QoS::AtLeastOnce => {
				return acknowledged(pkid, code);
			}
			| SessionEvent::PubComp { pkid, code } if qos == QoS::ExactlyOnce => {
				return acknowledged(pkid, code);
			}
			| SessionEvent::Disconnected => {
				return Err(PublishError::Transport(TransportError::Closed));
			}
			| event => trace!(event = ?event, "Waiting for publish acknowledgement"),
		}
	}
}

fn acknowledged(message_id: u16, code: u8) -> Result<u16, PublishError> {
	if code == 0 {
		Ok(message_id)
	} else {
		Err(PublishError::Rejected { code, message_id })
	}
}
