//! In-memory broker for exercising connectors without a network.
//!
//! [`InMemoryBroker`] implements [`Transport`] and behaves like a broker
//! with clean sessions: every successful connect starts with an empty
//! subscription set. Tests script connect outcomes, inject deliveries and
//! connection drops, and inspect what reached the broker.
//!
//! Like a real client, requests go through a bounded queue per link that
//! only the link's event loop drains. A subscribe or publish does not reach
//! the broker until the session is polled, and a sender blocks once the
//! queue is full.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::QoS;
use tokio::sync::mpsc;

use crate::connection::{
	CONNACK_SUCCESS, SessionClient, SessionEvent, SessionEventLoop, SessionKind,
	SessionLink, Transport, TransportError,
};
use crate::routing::InboundMessage;
use crate::topic::TopicPatternPath;

type EventResult = Result<SessionEvent, TransportError>;

/// Scripted answer to one connect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
	/// CONNACK with this return code
	ConnAck(u8),
	/// The network connection fails before any CONNACK
	Fail(String),
	/// The broker never answers
	Hang,
}

/// A message the broker accepted from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
	pub session: SessionKind,
	pub topic: String,
	pub payload: Bytes,
	pub qos: QoS,
}

/// Default capacity of each link's request queue
pub const DEFAULT_REQUEST_CAPACITY: usize = 10;

#[derive(Debug)]
enum Request {
	Subscribe { pattern: String, qos: QoS },
	Publish { topic: String, payload: Bytes, qos: QoS },
	Disconnect,
}

#[derive(Debug)]
struct Link {
	kind: SessionKind,
	client_id: String,
	connected: bool,
	closed: bool,
	subscriptions: Vec<(String, QoS)>,
	events: mpsc::UnboundedSender<EventResult>,
}

#[derive(Debug, Default)]
struct BrokerState {
	links: Vec<Link>,
	scripted: Vec<(SessionKind, ConnectOutcome)>,
	connect_attempts: Vec<SessionKind>,
	published: Vec<PublishedMessage>,
	publish_failure: Option<String>,
	ack_code: u8,
	silent_acks: bool,
	next_pkid: u16,
}

impl BrokerState {
	fn next_outcome(&mut self, kind: SessionKind) -> ConnectOutcome {
		match self.scripted.iter().position(|(k, _)| *k == kind) {
			| Some(index) => self.scripted.remove(index).1,
			| None => ConnectOutcome::ConnAck(CONNACK_SUCCESS),
		}
	}

	fn next_pkid(&mut self) -> u16 {
		self.next_pkid = self.next_pkid.wrapping_add(1).max(1);
		self.next_pkid
	}
}

/// Shared handle to an in-memory broker
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
	state: Arc<Mutex<BrokerState>>,
	request_capacity: usize,
}

impl Default for InMemoryBroker {
	fn default() -> Self {
		Self::with_request_capacity(DEFAULT_REQUEST_CAPACITY)
	}
}

impl InMemoryBroker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Broker whose links queue at most `capacity` undrained requests.
	pub fn with_request_capacity(capacity: usize) -> Self {
		Self {
			state: Arc::new(Mutex::new(BrokerState::default())),
			request_capacity: capacity.max(1),
		}
	}

	/// Queues outcomes for the next connect attempts of `kind`, in order.
	/// Attempts beyond the script are accepted.
	pub fn script_connects(
		&self,
		kind: SessionKind,
		outcomes: impl IntoIterator<Item = ConnectOutcome>,
	) {
		let mut state = self.state.lock();
		state
			.scripted
			.extend(outcomes.into_iter().map(|outcome| (kind, outcome)));
	}

	/// Makes the broker acknowledge QoS 1/2 publishes with `code`.
	pub fn set_ack_code(&self, code: u8) {
		self.state.lock().ack_code = code;
	}

	/// Makes the broker accept QoS 1/2 publishes without acknowledging them.
	pub fn withhold_acks(&self, silent: bool) {
		self.state.lock().silent_acks = silent;
	}

	/// Makes publish requests fail at the client with `reason`.
	pub fn fail_publishes(&self, reason: Option<&str>) {
		self.state.lock().publish_failure = reason.map(str::to_string);
	}

	/// Number of connect attempts seen for `kind`
	pub fn connect_attempts(&self, kind: SessionKind) -> usize {
		self.state
			.lock()
			.connect_attempts
			.iter()
			.filter(|k| **k == kind)
			.count()
	}

	/// Client identifiers of every link opened so far
	pub fn client_ids(&self) -> Vec<(SessionKind, String)> {
		self.state
			.lock()
			.links
			.iter()
			.map(|link| (link.kind, link.client_id.clone()))
			.collect()
	}

	/// Subscriptions of the connected links of `kind`, in arrival order.
	pub fn subscriptions(&self, kind: SessionKind) -> Vec<(String, QoS)> {
		self.state
			.lock()
			.links
			.iter()
			.filter(|link| link.kind == kind && link.connected)
			.flat_map(|link| link.subscriptions.iter().cloned())
			.collect()
	}

	/// Whether any link of `kind` is connected
	pub fn is_connected(&self, kind: SessionKind) -> bool {
		self.state
			.lock()
			.links
			.iter()
			.any(|link| link.kind == kind && link.connected)
	}

	pub fn published(&self) -> Vec<PublishedMessage> {
		self.state.lock().published.clone()
	}

	/// Routes a message to every connected link with a matching
	/// subscription. Returns the number of links it reached.
	pub fn deliver(
		&self,
		topic: &str,
		payload: impl Into<Bytes>,
		qos: QoS,
	) -> usize {
		let payload = payload.into();
		let state = self.state.lock();
		let mut delivered = 0;
		for link in state.links.iter().filter(|link| link.connected) {
			let subscribed = link.subscriptions.iter().any(|(pattern, _)| {
				TopicPatternPath::compile(pattern.as_str())
					.is_ok_and(|compiled| compiled.matches(topic))
			});
			if subscribed {
				let message = InboundMessage::new(topic, payload.clone(), qos);
				if link.events.send(Ok(SessionEvent::Message(message))).is_ok() {
					delivered += 1;
				}
			}
		}
		delivered
	}

	/// Breaks the network connection of every connected link of `kind`.
	/// The next poll of such a link reconnects.
	pub fn drop_connections(&self, kind: SessionKind) {
		let mut state = self.state.lock();
		for link in state
			.links
			.iter_mut()
			.filter(|link| link.kind == kind && link.connected)
		{
			link.connected = false;
			link.subscriptions.clear();
			let _ = link
				.events
				.send(Err(TransportError::Connection("connection reset by peer".into())));
		}
	}

	/// Applies one drained request to the link and returns the event the
	/// poll that drained it reports.
	fn apply(&self, link_id: usize, request: Request) -> EventResult {
		let mut state = self.state.lock();
		match request {
			| Request::Subscribe { pattern, qos } => {
				let link = &mut state.links[link_id];
				link.subscriptions.retain(|(existing, _)| *existing != pattern);
				link.subscriptions.push((pattern, qos));
				Ok(SessionEvent::Other)
			}
			| Request::Publish {
				topic,
				payload,
				qos,
			} => {
				let kind = state.links[link_id].kind;
				state.published.push(PublishedMessage {
					session: kind,
					topic,
					payload,
					qos,
				});
				let pkid = match qos {
					| QoS::AtMostOnce => 0,
					| _ => state.next_pkid(),
				};
				let code = state.ack_code;
				if !state.silent_acks {
					let events = &state.links[link_id].events;
					match qos {
						| QoS::AtMostOnce => {}
						| QoS::AtLeastOnce => {
							let _ = events.send(Ok(SessionEvent::PubAck { pkid, code }));
						}
						| QoS::ExactlyOnce => {
							let _ = events.send(Ok(SessionEvent::PubComp { pkid, code }));
						}
					}
				}
				Ok(SessionEvent::PublishSent { pkid })
			}
			| Request::Disconnect => {
				let link = &mut state.links[link_id];
				link.closed = true;
				link.connected = false;
				link.subscriptions.clear();
				Ok(SessionEvent::Disconnected)
			}
		}
	}
}

impl Transport for InMemoryBroker {
	fn open(&self, kind: SessionKind, client_id: &str) -> SessionLink {
		let (events, receiver) = mpsc::unbounded_channel();
		let (requests, pending) = mpsc::channel(self.request_capacity);
		let link_id = {
			let mut state = self.state.lock();
			state.links.push(Link {
				kind,
				client_id: client_id.to_string(),
				connected: false,
				closed: false,
				subscriptions: Vec::new(),
				events,
			});
			state.links.len() - 1
		};
		SessionLink {
			client: Arc::new(InMemoryClient {
				broker: self.clone(),
				link_id,
				requests,
			}),
			event_loop: Box::new(InMemoryEventLoop {
				broker: self.clone(),
				link_id,
				receiver,
				pending,
			}),
		}
	}
}

struct InMemoryClient {
	broker: InMemoryBroker,
	link_id: usize,
	requests: mpsc::Sender<Request>,
}

impl InMemoryClient {
	fn check_open(&self) -> Result<(), TransportError> {
		match self.broker.state.lock().links.get(self.link_id) {
			| Some(link) if !link.closed => Ok(()),
			| _ => Err(TransportError::Closed),
		}
	}

	async fn enqueue(&self, request: Request) -> Result<(), TransportError> {
		self.check_open()?;
		self.requests
			.send(request)
			.await
			.map_err(|_| TransportError::Closed)
	}
}

#[async_trait]
impl SessionClient for InMemoryClient {
	async fn subscribe(&self, pattern: &str, qos: QoS) -> Result<(), TransportError> {
		self.enqueue(Request::Subscribe {
			pattern: pattern.to_string(),
			qos,
		})
		.await
	}

	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
	) -> Result<(), TransportError> {
		let failure = self.broker.state.lock().publish_failure.clone();
		if let Some(reason) = failure {
			return Err(TransportError::Request(reason));
		}
		self.enqueue(Request::Publish {
			topic: topic.to_string(),
			payload,
			qos,
		})
		.await
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		self.enqueue(Request::Disconnect).await
	}

	fn try_disconnect(&self) -> Result<(), TransportError> {
		self.check_open()?;
		self.requests
			.try_send(Request::Disconnect)
			.map_err(|err| TransportError::Request(err.to_string()))
	}
}

struct InMemoryEventLoop {
	broker: InMemoryBroker,
	link_id: usize,
	receiver: mpsc::UnboundedReceiver<EventResult>,
	pending: mpsc::Receiver<Request>,
}

impl InMemoryEventLoop {
	/// Attempts a connect when the link is down. Returns the scripted
	/// answer, or `None` when no attempt was made.
	fn connect_if_needed(&self) -> Option<ConnectOutcome> {
		let mut state = self.broker.state.lock();
		let link = state.links.get(self.link_id)?;
		if link.connected || link.closed {
			return None;
		}
		let kind = link.kind;
		state.connect_attempts.push(kind);
		let outcome = state.next_outcome(kind);
		if outcome == ConnectOutcome::ConnAck(CONNACK_SUCCESS) {
			let link = &mut state.links[self.link_id];
			link.connected = true;
			link.subscriptions.clear();
		}
		Some(outcome)
	}
}

#[async_trait]
impl SessionEventLoop for InMemoryEventLoop {
	async fn poll(&mut self) -> Result<SessionEvent, TransportError> {
		// events raised before a drop are observed before the reconnect
		if let Ok(event) = self.receiver.try_recv() {
			return event;
		}
		match self.connect_if_needed() {
			| Some(ConnectOutcome::ConnAck(code)) => {
				return Ok(SessionEvent::ConnAck {
					code,
					session_present: false,
				});
			}
			| Some(ConnectOutcome::Fail(reason)) => {
				return Err(TransportError::Connection(reason));
			}
			| Some(ConnectOutcome::Hang) => {
				futures::future::pending::<()>().await;
			}
			| None => {}
		}
		let connected = self
			.broker
			.state
			.lock()
			.links
			.get(self.link_id)
			.is_some_and(|link| link.connected);
		tokio::select! {
			biased;
			event = self.receiver.recv() => match event {
				| Some(event) => event,
				| None => Err(TransportError::Closed),
			},
			Some(request) = self.pending.recv(), if connected => {
				self.broker.apply(self.link_id, request)
			}
		}
	}
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if condition() {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}
