use std::fmt::{self, Display};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::transport::{SessionClient, SessionKind};

/// Connection state of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
	#[default]
	Disconnected,
	Connecting,
	Connected,
}

impl Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			| SessionState::Disconnected => "disconnected",
			| SessionState::Connecting => "connecting",
			| SessionState::Connected => "connected",
		};
		f.write_str(name)
	}
}

/// One logical broker connection and its state machine.
///
/// The state is published through a `watch` channel so callers can observe
/// transitions without polling. The request half of the current link is
/// kept only while the session is (or is becoming) connected.
pub struct Session {
	kind: SessionKind,
	state: watch::Sender<SessionState>,
	client: Mutex<Option<Arc<dyn SessionClient>>>,
}

impl Session {
	pub(crate) fn new(kind: SessionKind) -> Self {
		let (state, _) = watch::channel(SessionState::Disconnected);
		Self {
			kind,
			state,
			client: Mutex::new(None),
		}
	}

	pub fn kind(&self) -> SessionKind {
		self.kind
	}

	pub fn state(&self) -> SessionState {
		*self.state.borrow()
	}

	pub fn is_connected(&self) -> bool {
		self.state() == SessionState::Connected
	}

	/// Receiver that observes every later state transition
	pub fn watch(&self) -> watch::Receiver<SessionState> {
		self.state.subscribe()
	}

	pub(crate) fn set_state(&self, state: SessionState) {
		let previous = self.state.send_replace(state);
		if previous != state {
			debug!(session = %self.kind, from = %previous, to = %state, "Session state changed");
		}
	}

	pub(crate) fn client(&self) -> Option<Arc<dyn SessionClient>> {
		self.client.lock().clone()
	}

	pub(crate) fn set_client(&self, client: Arc<dyn SessionClient>) {
		*self.client.lock() = Some(client);
	}

	pub(crate) fn take_client(&self) -> Option<Arc<dyn SessionClient>> {
		self.client.lock().take()
	}
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("kind", &self.kind)
			.field("state", &self.state())
			.finish()
	}
}

/// The three independent sessions of a connector.
#[derive(Debug)]
pub(crate) struct Sessions {
	general: Arc<Session>,
	publish: Arc<Session>,
	subscribe: Arc<Session>,
}

impl Sessions {
	pub(crate) fn new() -> Self {
		Self {
			general: Arc::new(Session::new(SessionKind::General)),
			publish: Arc::new(Session::new(SessionKind::Publish)),
			subscribe: Arc::new(Session::new(SessionKind::Subscribe)),
		}
	}

	pub(crate) fn get(&self, kind: SessionKind) -> &Arc<Session> {
		match kind {
			| SessionKind::General => &self.general,
			| SessionKind::Publish => &self.publish,
			| SessionKind::Subscribe => &self.subscribe,
		}
	}

	pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Session>> {
		SessionKind::ALL.into_iter().map(|kind| self.get(kind))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_state_transitions_are_observable() {
		let session = Session::new(SessionKind::Subscribe);
		let mut rx = session.watch();
		assert_eq!(session.state(), SessionState::Disconnected);

		session.set_state(SessionState::Connecting);
		assert!(rx.has_changed().unwrap());
		assert_eq!(*rx.borrow_and_update(), SessionState::Connecting);

		session.set_state(SessionState::Connected);
		assert!(session.is_connected());
	}

	#[test]
	fn test_sessions_are_independent() {
		let sessions = Sessions::new();
		sessions.get(SessionKind::Publish).set_state(SessionState::Connected);

		assert!(sessions.get(SessionKind::Publish).is_connected());
		assert!(!sessions.get(SessionKind::Subscribe).is_connected());
		assert!(!sessions.get(SessionKind::General).is_connected());
		assert_eq!(sessions.iter().count(), 3);
	}
}
