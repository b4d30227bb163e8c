use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::Event::{Incoming, Outgoing};
use rumqttc::{
	AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, EventLoop,
	MqttOptions, Packet, PubAck, PubComp, QoS,
};
use tracing::trace;

use super::transport::{
	SessionClient, SessionEvent, SessionEventLoop, SessionKind, SessionLink,
	Transport, TransportError,
};
use crate::client::config::{ConnectorConfig, TransportKind};
use crate::routing::InboundMessage;

/// Production transport backed by `rumqttc`.
#[derive(Debug, Clone)]
pub struct RumqttcTransport {
	config: Arc<ConnectorConfig>,
}

impl RumqttcTransport {
	pub fn new(config: Arc<ConnectorConfig>) -> Self {
		Self { config }
	}

	/// Builds the `rumqttc` options for one session.
	pub fn mqtt_options(&self, client_id: &str) -> MqttOptions {
		let config = &self.config;
		let mut options = match config.transport {
			| TransportKind::Tcp => {
				MqttOptions::new(client_id, config.host.as_str(), config.port)
			}
			| TransportKind::Websockets => {
				// rumqttc expects the full URL as host for WebSocket links
				let url = format!("ws://{}:{}/mqtt", config.host, config.port);
				let mut options = MqttOptions::new(client_id, url, config.port);
				options.set_transport(rumqttc::Transport::Ws);
				options
			}
		};
		options
			.set_keep_alive(config.keepalive_duration())
			.set_clean_session(config.clean_session);
		if let Some((username, password)) = config.credentials() {
			options.set_credentials(username, password);
		}
		options
	}
}

impl Transport for RumqttcTransport {
	fn open(&self, kind: SessionKind, client_id: &str) -> SessionLink {
		let (client, event_loop) = AsyncClient::new(
			self.mqtt_options(client_id),
			self.config.settings.event_loop_capacity,
		);
		trace!(session = %kind, client_id, "Opened rumqttc session link");
		SessionLink {
			client: Arc::new(RumqttcClient { client }),
			event_loop: Box::new(RumqttcEventLoop { event_loop }),
		}
	}
}

struct RumqttcClient {
	client: AsyncClient,
}

#[async_trait]
impl SessionClient for RumqttcClient {
	async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
		self.client
			.subscribe(pattern, qos)
			.await
			.map_err(|e| TransportError::Request(e.to_string()))
	}

	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
	) -> Result<(), TransportError> {
		self.client
			.publish_bytes(topic, qos, false, payload)
			.await
			.map_err(|e| TransportError::Request(e.to_string()))
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		self.client
			.disconnect()
			.await
			.map_err(|e| TransportError::Request(e.to_string()))
	}

	fn try_disconnect(&self) -> Result<(), TransportError> {
		self.client
			.try_disconnect()
			.map_err(|e| TransportError::Request(e.to_string()))
	}
}

struct RumqttcEventLoop {
	event_loop: EventLoop,
}

#[async_trait]
impl SessionEventLoop for RumqttcEventLoop {
	async fn poll(&mut self) -> Result<SessionEvent, TransportError> {
		let event = match self.event_loop.poll().await {
			| Ok(Incoming(Packet::ConnAck(ConnAck {
				session_present,
				code,
			}))) => SessionEvent::ConnAck {
				code: return_code(code),
				session_present,
			},
			// rumqttc reports a refused CONNACK as an error; keep the code
			| Err(ConnectionError::ConnectionRefused(code)) => {
				SessionEvent::ConnAck {
					code: return_code(code),
					session_present: false,
				}
			}
			| Ok(Incoming(Packet::Publish(publish))) => {
				SessionEvent::Message(InboundMessage::new(
					publish.topic,
					publish.payload,
					publish.qos,
				))
			}
			| Ok(Incoming(Packet::PubAck(PubAck { pkid }))) => {
				SessionEvent::PubAck { pkid, code: 0 }
			}
			| Ok(Incoming(Packet::PubComp(PubComp { pkid }))) => {
				SessionEvent::PubComp { pkid, code: 0 }
			}
			| Ok(Outgoing(rumqttc::Outgoing::Publish(pkid))) => {
				SessionEvent::PublishSent { pkid }
			}
			| Ok(Incoming(Packet::Disconnect))
			| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
				SessionEvent::Disconnected
			}
			| Ok(notification) => {
				trace!(notification = ?notification, "Unhandled MQTT notification");
				SessionEvent::Other
			}
			| Err(err) => return Err(TransportError::Connection(err.to_string())),
		};
		Ok(event)
	}
}

fn return_code(code: ConnectReturnCode) -> u8 {
	match code {
		| ConnectReturnCode::Success => 0,
		| ConnectReturnCode::RefusedProtocolVersion => 1,
		| ConnectReturnCode::BadClientId => 2,
		| ConnectReturnCode::ServiceUnavailable => 3,
		| ConnectReturnCode::BadUserNamePassword => 4,
		| ConnectReturnCode::NotAuthorized => 5,
	}
}
