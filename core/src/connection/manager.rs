use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::error::ConnectError;
use super::session::{Session, SessionState, Sessions};
use super::transport::{
	CONNACK_NOT_AUTHORIZED, CONNACK_SUCCESS, SessionClient, SessionEvent,
	SessionEventLoop, SessionKind, SessionLink, Transport,
};
use crate::client::config::{ClientSettings, ConnectorConfig};
use crate::routing::{Dispatcher, Subscription, SubscriptionError, SubscriptionRegistry};

/// Owns the general, publish and subscribe sessions of one connector.
///
/// The subscribe session is kept alive by a background loop that
/// reconnects with exponential backoff and resubscribes every registered
/// pattern on each successful connect. The publish and general sessions
/// are never reconnected automatically.
pub struct ConnectionManager {
	config: Arc<ConnectorConfig>,
	transport: Arc<dyn Transport>,
	dispatcher: Dispatcher,
	sessions: Sessions,
	subscribe_loop: AsyncMutex<Option<JoinHandle<()>>>,
	general_driver: AsyncMutex<Option<JoinHandle<()>>>,
	running: Arc<watch::Sender<bool>>,
	cancel: CancellationToken,
	shut_down: AtomicBool,
}

impl ConnectionManager {
	pub fn new(
		config: Arc<ConnectorConfig>,
		transport: Arc<dyn Transport>,
		dispatcher: Dispatcher,
	) -> Self {
		let (running, _) = watch::channel(false);
		Self {
			config,
			transport,
			dispatcher,
			sessions: Sessions::new(),
			subscribe_loop: AsyncMutex::new(None),
			general_driver: AsyncMutex::new(None),
			running: Arc::new(running),
			cancel: CancellationToken::new(),
			shut_down: AtomicBool::new(false),
		}
	}

	pub fn config(&self) -> &Arc<ConnectorConfig> {
		&self.config
	}

	pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
		self.dispatcher.registry()
	}

	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	pub fn session(&self, kind: SessionKind) -> &Arc<Session> {
		self.sessions.get(kind)
	}

	pub fn session_state(&self, kind: SessionKind) -> SessionState {
		self.sessions.get(kind).state()
	}

	/// Whether the subscribe session's background loop is alive
	pub fn is_subscribe_loop_running(&self) -> bool {
		*self.running.borrow()
	}

	fn session_client_id(&self, kind: SessionKind) -> String {
		let suffix = Uuid::new_v4().simple().to_string();
		format!("{}-{}-{}", self.config.client_id, kind, &suffix[.. 8])
	}

	/// Opens a fresh link for `kind` and waits for the broker's CONNACK.
	///
	/// On success the session is `Connected` and the caller owns the event
	/// loop, which must keep being polled. Any failure leaves the session
	/// `Disconnected`.
	pub async fn establish(
		&self,
		kind: SessionKind,
	) -> Result<SessionLink, ConnectError> {
		if self.cancel.is_cancelled() {
			return Err(ConnectError::Shutdown);
		}
		let session = self.sessions.get(kind);
		session.set_state(SessionState::Connecting);

		let client_id = self.session_client_id(kind);
		let SessionLink {
			client,
			mut event_loop,
		} = self.transport.open(kind, &client_id);

		let timeout_millis = self.config.settings.connection_timeout_millis;
		let outcome = tokio::time::timeout(
			self.config.settings.connection_timeout(),
			wait_for_connack(event_loop.as_mut()),
		)
		.await
		.map_err(|_| ConnectError::Timeout { timeout_millis })
		.and_then(|connected| connected);

		match outcome {
			| Ok(session_present) => {
				session.set_client(Arc::clone(&client));
				session.set_state(SessionState::Connected);
				info!(
					session = %kind,
					client_id = %client_id,
					session_present,
					"MQTT session connected"
				);
				Ok(SessionLink { client, event_loop })
			}
			| Err(err) => {
				session.set_state(SessionState::Disconnected);
				match &err {
					| ConnectError::BrokerRejected { code } => {
						warn_rejected(kind, *code)
					}
					| _ => warn!(session = %kind, error = %err, "MQTT session connect failed"),
				}
				Err(err)
			}
		}
	}

	/// Forgets the current link of `kind` without sending anything.
	pub(crate) fn release(&self, kind: SessionKind) {
		let session = self.sessions.get(kind);
		session.take_client();
		session.set_state(SessionState::Disconnected);
	}

	/// Starts the subscribe session unless its loop is already running.
	///
	/// Returns `true` when this call connected the session. The loop then
	/// subscribes every registry entry, so the caller need not.
	pub async fn ensure_subscribe_session(&self) -> Result<bool, ConnectError> {
		let mut slot = self.subscribe_loop.lock().await;
		if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return Ok(false);
		}

		let SessionLink { client, event_loop } =
			self.establish(SessionKind::Subscribe).await?;

		self.running.send_replace(true);
		let subscribe_loop = SubscribeLoop {
			session: Arc::clone(self.sessions.get(SessionKind::Subscribe)),
			client,
			dispatcher: self.dispatcher.clone(),
			settings: self.config.settings.clone(),
			cancel: self.cancel.clone(),
			running: Arc::clone(&self.running),
		};
		*slot = Some(tokio::spawn(subscribe_loop.run(event_loop)));
		Ok(true)
	}

	/// Issues the broker subscribe for one entry if the subscribe session is
	/// connected. Otherwise the next CONNACK's resubscription covers it.
	pub async fn subscribe_pattern(
		&self,
		subscription: &Subscription,
	) -> Result<bool, SubscriptionError> {
		let session = self.sessions.get(SessionKind::Subscribe);
		let client = match (session.is_connected(), session.client()) {
			| (true, Some(client)) => client,
			| _ => {
				debug!(
					pattern = %subscription.pattern(),
					"Subscribe session not connected, subscription deferred"
				);
				return Ok(false);
			}
		};
		client
			.subscribe(subscription.pattern().as_str(), subscription.qos())
			.await
			.map_err(|source| SubscriptionError::SubscribeFailed {
				pattern: subscription.pattern().to_string(),
				source,
			})?;
		debug!(
			pattern = %subscription.pattern(),
			qos = ?subscription.qos(),
			"Subscribed to topic pattern"
		);
		Ok(true)
	}

	/// Resolves once the subscribe loop is not running.
	pub async fn wait_subscribe_session(&self) {
		let mut running = self.running.subscribe();
		let _ = running.wait_for(|running| !*running).await;
	}

	/// Connects the general session and keeps it polled in the background.
	pub async fn connect_general(&self) -> Result<(), ConnectError> {
		let mut driver = self.general_driver.lock().await;
		if self.sessions.get(SessionKind::General).is_connected()
			&& driver.as_ref().is_some_and(|handle| !handle.is_finished())
		{
			return Ok(());
		}
		let SessionLink { event_loop, .. } =
			self.establish(SessionKind::General).await?;
		let session = Arc::clone(self.sessions.get(SessionKind::General));
		*driver =
			Some(tokio::spawn(drive_session(session, event_loop, self.cancel.clone())));
		Ok(())
	}

	/// Disconnects every open session and stops the background tasks.
	///
	/// Each disconnect request and the in-flight handlers get
	/// `shutdown_timeout` to finish.
	pub async fn shutdown(&self) {
		if self.shut_down.swap(true, Ordering::SeqCst) {
			return;
		}
		info!("Shutting down MQTT connector");
		let timeout = self.config.settings.shutdown_timeout();
		for session in self.sessions.iter() {
			let Some(client) = session.client() else {
				continue;
			};
			// the request queue only drains while the session is polled
			match tokio::time::timeout(timeout, client.disconnect()).await {
				| Ok(Ok(())) => {}
				| Ok(Err(err)) => {
					warn!(session = %session.kind(), error = %err, "Failed to disconnect MQTT session")
				}
				| Err(_) => {
					warn!(session = %session.kind(), "MQTT session disconnect request timed out")
				}
			}
		}

		// closing the pool also releases a loop blocked on a busy slot
		self.dispatcher.pool().shutdown(timeout).await;

		let subscribe_loop = self.subscribe_loop.lock().await.take();
		let general_driver = self.general_driver.lock().await.take();
		for (task, handle) in [("subscribe", subscribe_loop), ("general", general_driver)] {
			if let Some(handle) = handle {
				join_task(task, handle, timeout).await;
			}
		}
		self.cancel.cancel();
		for session in self.sessions.iter() {
			session.take_client();
			session.set_state(SessionState::Disconnected);
		}
		info!("MQTT connector shut down");
	}
}

impl Drop for ConnectionManager {
	fn drop(&mut self) {
		if self.shut_down.load(Ordering::SeqCst) {
			return;
		}
		let subscribe_loop = self.subscribe_loop.get_mut().take();
		let general_driver = self.general_driver.get_mut().take();
		let open_sessions = self.sessions.iter().any(|s| s.client().is_some());
		if subscribe_loop.is_none() && general_driver.is_none() && !open_sessions {
			return;
		}
		error!(
			"MQTT connector dropped without calling shutdown(). Please call \
			 shutdown() and await its completion before dropping."
		);
		for session in self.sessions.iter() {
			if let Some(client) = session.take_client() {
				let _ = client.try_disconnect();
			}
			session.set_state(SessionState::Disconnected);
		}
		self.cancel.cancel();
		for handle in [subscribe_loop, general_driver].into_iter().flatten() {
			handle.abort();
		}
	}
}

impl std::fmt::Debug for ConnectionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionManager")
			.field("host", &self.config.host)
			.field("port", &self.config.port)
			.field("sessions", &self.sessions)
			.field("subscribe_loop_running", &self.is_subscribe_loop_running())
			.finish()
	}
}

async fn wait_for_connack(
	event_loop: &mut dyn SessionEventLoop,
) -> Result<bool, ConnectError> {
	loop {
		match event_loop.poll().await {
			| Ok(SessionEvent::ConnAck {
				code: CONNACK_SUCCESS,
				session_present,
			}) => return Ok(session_present),
			| Ok(SessionEvent::ConnAck { code, .. }) => {
				return Err(ConnectError::BrokerRejected { code });
			}
			| Ok(event) => {
				debug!(event = ?event, "Bootstrap phase notification");
			}
			| Err(err) => {
				debug!(error = %err, "MQTT connection error during bootstrap phase");
				return Err(ConnectError::Network(err));
			}
		}
	}
}

fn warn_rejected(kind: SessionKind, code: u8) {
	if code == CONNACK_NOT_AUTHORIZED {
		warn!(
			session = %kind,
			code,
			"MQTT broker refused connection: not authorized, check username and password"
		);
	} else {
		warn!(session = %kind, code, "MQTT broker refused connection");
	}
}

/// Subscribes every registry entry, in registration order.
///
/// Each subscribe waits for room in the session's request queue, which only
/// drains while the event loop is polled. Never await this from the task that
/// polls `client`'s event loop.
pub(crate) async fn resubscribe_all(
	client: &dyn SessionClient,
	registry: &SubscriptionRegistry,
) -> Result<usize, SubscriptionError> {
	let snapshot = registry.snapshot();
	let total = snapshot.len();
	let mut failed = 0;
	for subscription in &snapshot {
		let pattern = subscription.pattern();
		match client.subscribe(pattern.as_str(), subscription.qos()).await {
			| Ok(()) => {
				trace!(pattern = %pattern, qos = ?subscription.qos(), "Resubscribed")
			}
			| Err(err) => {
				failed += 1;
				warn!(pattern = %pattern, error = %err, "Failed to resubscribe to topic pattern");
			}
		}
	}
	if failed > 0 {
		return Err(SubscriptionError::ResubscribeFailed { failed, total });
	}
	info!(count = total, "Subscribed all registered patterns");
	Ok(total)
}

/// Backoff before the `error_count`-th retry: doubles from the initial
/// delay and is capped at the maximum.
pub(crate) fn retry_delay(settings: &ClientSettings, error_count: u32) -> Duration {
	let exponent = error_count.saturating_sub(1).min(10);
	settings
		.initial_retry_delay()
		.saturating_mul(2_u32.pow(exponent))
		.min(settings.max_retry_delay())
}

async fn join_task(task: &str, mut handle: JoinHandle<()>, timeout: Duration) {
	match tokio::time::timeout(timeout, &mut handle).await {
		| Ok(Ok(())) => {}
		| Ok(Err(err)) => warn!(task, error = %err, "Session task failed"),
		| Err(_) => {
			warn!(task, "Session task did not stop in time, aborting");
			handle.abort();
		}
	}
}

/// Polls a session that is not reconnected automatically until it ends.
async fn drive_session(
	session: Arc<Session>,
	mut event_loop: Box<dyn SessionEventLoop>,
	cancel: CancellationToken,
) {
	loop {
		let polled = tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			polled = event_loop.poll() => polled,
		};
		match polled {
			| Ok(SessionEvent::Disconnected) => break,
			| Ok(event) => {
				trace!(session = %session.kind(), event = ?event, "Session event")
			}
			| Err(err) => {
				warn!(session = %session.kind(), error = %err, "MQTT session lost");
				break;
			}
		}
	}
	session.take_client();
	session.set_state(SessionState::Disconnected);
	debug!(session = %session.kind(), "Session driver stopped");
}

struct SubscribeLoop {
	session: Arc<Session>,
	client: Arc<dyn SessionClient>,
	dispatcher: Dispatcher,
	settings: ClientSettings,
	cancel: CancellationToken,
	running: Arc<watch::Sender<bool>>,
}

impl SubscribeLoop {
	/// Processes subscribe-session events until a disconnect, cancellation
	/// or too many consecutive errors.
	async fn run(self, mut event_loop: Box<dyn SessionEventLoop>) {
		let mut error_count: u32 = 0;
		// the link is already acknowledged when the loop starts
		let mut resubscription = self.spawn_resubscription();
		loop {
			let polled = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => {
					debug!("Subscribe session loop cancelled");
					break;
				}
				polled = event_loop.poll() => polled,
			};
			match polled {
				| Ok(SessionEvent::ConnAck {
					code: CONNACK_SUCCESS,
					session_present,
				}) => {
					error_count = 0;
					self.session.set_state(SessionState::Connected);
					info!(
						session_present,
						"MQTT reconnected, resubscribing to all topics"
					);
					resubscription.abort();
					resubscription = self.spawn_resubscription();
				}
				| Ok(SessionEvent::ConnAck { code, .. }) => {
					warn_rejected(SessionKind::Subscribe, code);
					if !self.back_off(&mut error_count).await {
						break;
					}
				}
				| Ok(SessionEvent::Message(message)) => {
					error_count = 0;
					debug!(
						topic = %message.topic,
						payload_size = message.payload.len(),
						"Received MQTT message"
					);
					self.dispatcher.dispatch(message).await;
				}
				| Ok(SessionEvent::Disconnected) => {
					info!("MQTT subscribe session disconnected");
					break;
				}
				| Ok(event) => {
					error_count = 0;
					trace!(event = ?event, "Received other MQTT event");
				}
				| Err(err) => {
					error!(
						error_count = error_count + 1,
						error = %err,
						"MQTT event loop error"
					);
					if !self.back_off(&mut error_count).await {
						break;
					}
				}
			}
		}
		resubscription.abort();
		self.session.take_client();
		self.session.set_state(SessionState::Disconnected);
		self.running.send_replace(false);
		info!("MQTT subscribe session loop terminated");
	}

	/// Subscribes the registry on a separate task while this loop keeps
	/// polling the event loop.
	fn spawn_resubscription(&self) -> JoinHandle<()> {
		let client = Arc::clone(&self.client);
		let registry = Arc::clone(self.dispatcher.registry());
		tokio::spawn(async move {
			if let Err(err) = resubscribe_all(client.as_ref(), &registry).await {
				error!(error = %err, "Failed to resubscribe to topics");
			}
		})
	}

	/// Counts a failure and sleeps before the next attempt. Returns `false`
	/// when the loop should give up.
	async fn back_off(&self, error_count: &mut u32) -> bool {
		self.session.set_state(SessionState::Disconnected);
		*error_count += 1;
		let max_errors = self.settings.max_consecutive_errors;
		if *error_count >= max_errors {
			error!(
				error_count = *error_count,
				max_errors,
				"Too many consecutive errors, terminating subscribe session loop"
			);
			return false;
		}

		let delay = retry_delay(&self.settings, *error_count);
		warn!(delay = ?delay, error_count = *error_count, "Retrying MQTT connection");
		tokio::select! {
			biased;
			_ = self.cancel.cancelled() => return false,
			_ = tokio::time::sleep(delay) => {}
		}
		self.session.set_state(SessionState::Connecting);
		true
	}
}
