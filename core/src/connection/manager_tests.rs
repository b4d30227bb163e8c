use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rumqttc::QoS;

use super::manager::retry_delay;
use super::*;
use crate::client::config::{ClientSettings, ConnectorConfig};
use crate::routing::{
	BackpressurePolicy, DispatchPool, Dispatcher, HandlerError, MessageHandler,
	SubscriptionRegistry, handler_fn,
};
use crate::testing::{
	ConnectOutcome, DEFAULT_REQUEST_CAPACITY, InMemoryBroker, eventually,
};

const WAIT: Duration = Duration::from_secs(2);

fn fast_settings() -> ClientSettings {
	ClientSettings {
		connection_timeout_millis: 200,
		initial_retry_delay_millis: 1,
		max_retry_delay_millis: 5,
		shutdown_timeout_millis: 500,
		max_concurrent_callbacks: 4,
		backpressure: BackpressurePolicy::Block,
		..ClientSettings::default()
	}
}

fn manager_with(broker: &InMemoryBroker, settings: ClientSettings) -> ConnectionManager {
	let config = Arc::new(ConnectorConfig::localhost().with_settings(settings));
	let pool = DispatchPool::new(
		config.settings.max_concurrent_callbacks,
		config.settings.dispatch_queue_capacity,
		config.settings.backpressure,
	);
	let dispatcher = Dispatcher::new(Arc::new(SubscriptionRegistry::new()), pool);
	ConnectionManager::new(config, Arc::new(broker.clone()), dispatcher)
}

fn manager(broker: &InMemoryBroker) -> ConnectionManager {
	manager_with(broker, fast_settings())
}

fn noop() -> Arc<dyn MessageHandler> {
	Arc::new(handler_fn(|_, _| async { Ok::<(), HandlerError>(()) }))
}

/// Registry content as the broker should see it after a connect
fn expected_subscriptions(registry: &SubscriptionRegistry) -> Vec<(String, QoS)> {
	registry
		.snapshot()
		.iter()
		.map(|s| (s.pattern().to_string(), s.qos()))
		.collect()
}

mod establish_tests {
	use super::*;

	#[tokio::test]
	async fn test_establish_connects_session() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);

		let link = manager.establish(SessionKind::General).await.unwrap();
		assert_eq!(manager.session_state(SessionKind::General), SessionState::Connected);
		assert_eq!(
			manager.session_state(SessionKind::Subscribe),
			SessionState::Disconnected
		);
		drop(link);
		manager.release(SessionKind::General);
		assert_eq!(
			manager.session_state(SessionKind::General),
			SessionState::Disconnected
		);
	}

	#[tokio::test]
	async fn test_each_session_gets_its_own_client_id() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		for kind in SessionKind::ALL {
			manager.establish(kind).await.unwrap();
		}

		let ids = broker.client_ids();
		assert_eq!(ids.len(), 3);
		for (kind, id) in &ids {
			let prefix = format!("mqtt-connector-{kind}-");
			assert!(id.starts_with(&prefix), "unexpected client id {id}");
			assert_eq!(id.len(), prefix.len() + 8);
		}
		manager.shutdown().await;
	}

	#[tokio::test]
	async fn test_broker_rejection_returns_code() {
		let broker = InMemoryBroker::new();
		broker.script_connects(SessionKind::General, [ConnectOutcome::ConnAck(
			CONNACK_NOT_AUTHORIZED,
		)]);
		let manager = manager(&broker);

		let err = manager.establish(SessionKind::General).await.err().unwrap();
		assert_eq!(err, ConnectError::BrokerRejected { code: 5 });
		assert_eq!(
			manager.session_state(SessionKind::General),
			SessionState::Disconnected
		);
	}

	#[tokio::test]
	async fn test_network_failure() {
		let broker = InMemoryBroker::new();
		broker.script_connects(SessionKind::Publish, [ConnectOutcome::Fail(
			"connection refused".into(),
		)]);
		let manager = manager(&broker);

		let err = manager.establish(SessionKind::Publish).await.err().unwrap();
		assert!(matches!(err, ConnectError::Network(TransportError::Connection(_))));
	}

	#[tokio::test]
	async fn test_unanswered_connect_times_out() {
		let broker = InMemoryBroker::new();
		broker.script_connects(SessionKind::General, [ConnectOutcome::Hang]);
		let manager = manager(&broker);

		let err = manager.establish(SessionKind::General).await.err().unwrap();
		assert_eq!(err, ConnectError::Timeout { timeout_millis: 200 });
		assert_eq!(
			manager.session_state(SessionKind::General),
			SessionState::Disconnected
		);
	}

	#[tokio::test]
	async fn test_general_session_stays_connected_until_shutdown() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);

		manager.connect_general().await.unwrap();
		manager.connect_general().await.unwrap();
		assert_eq!(broker.connect_attempts(SessionKind::General), 1);
		assert!(broker.is_connected(SessionKind::General));

		manager.shutdown().await;
		assert!(!broker.is_connected(SessionKind::General));
		assert_eq!(
			manager.session_state(SessionKind::General),
			SessionState::Disconnected
		);
		assert_eq!(
			manager.establish(SessionKind::General).await.err(),
			Some(ConnectError::Shutdown)
		);
	}
}

mod subscribe_session_tests {
	use super::*;

	#[tokio::test]
	async fn test_initial_connect_subscribes_registry() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		let registry = Arc::clone(manager.registry());
		registry.register("a/+", QoS::AtMostOnce, noop(), true).unwrap();
		registry.register("b/#", QoS::AtLeastOnce, noop(), true).unwrap();

		assert!(manager.ensure_subscribe_session().await.unwrap());
		assert!(!manager.ensure_subscribe_session().await.unwrap());
		assert!(manager.is_subscribe_loop_running());
		let expected = expected_subscriptions(&registry);
		assert!(
			eventually(WAIT, || broker.subscriptions(SessionKind::Subscribe) == expected)
				.await
		);
		manager.shutdown().await;
	}

	#[tokio::test]
	async fn test_more_patterns_than_request_capacity() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		let registry = Arc::clone(manager.registry());
		let capacity = manager.config().settings.event_loop_capacity;
		assert_eq!(capacity, DEFAULT_REQUEST_CAPACITY);
		for index in 0 .. capacity + 5 {
			registry
				.register(format!("plant/{index}/+"), QoS::AtLeastOnce, noop(), true)
				.unwrap();
		}
		let expected = expected_subscriptions(&registry);

		let connected = tokio::time::timeout(WAIT, manager.ensure_subscribe_session())
			.await
			.expect("initial connect should not stall on a full request queue");
		assert!(connected.unwrap());
		assert!(
			eventually(WAIT, || broker.subscriptions(SessionKind::Subscribe) == expected)
				.await
		);

		broker.drop_connections(SessionKind::Subscribe);
		assert!(
			eventually(WAIT, || broker.connect_attempts(SessionKind::Subscribe) == 2).await
		);
		assert!(
			eventually(WAIT, || broker.subscriptions(SessionKind::Subscribe) == expected)
				.await,
			"reconnect restored {} of {} patterns",
			broker.subscriptions(SessionKind::Subscribe).len(),
			expected.len()
		);

		// the loop still serves deliveries after the burst
		assert_eq!(broker.deliver("plant/14/temp", "1", QoS::AtMostOnce), 1);
		tokio::time::timeout(WAIT, manager.shutdown())
			.await
			.expect("shutdown should not stall");
		assert!(!broker.is_connected(SessionKind::Subscribe));
	}

	#[tokio::test]
	async fn test_reconnect_restores_exactly_the_registry() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		let registry = Arc::clone(manager.registry());
		registry.register("sensors/+/temp", QoS::AtLeastOnce, noop(), true).unwrap();
		manager.ensure_subscribe_session().await.unwrap();

		// registered while connected: subscribed directly
		let added = registry.register("alerts/#", QoS::ExactlyOnce, noop(), false).unwrap();
		assert!(manager.subscribe_pattern(&added).await.unwrap());
		// replaced with a different QoS
		registry.register("sensors/+/temp", QoS::AtMostOnce, noop(), true).unwrap();

		broker.drop_connections(SessionKind::Subscribe);
		let expected = expected_subscriptions(&registry);
		assert!(
			eventually(WAIT, || broker.subscriptions(SessionKind::Subscribe) == expected)
				.await,
			"broker subscriptions {:?} != registry {:?}",
			broker.subscriptions(SessionKind::Subscribe),
			expected
		);
		assert_eq!(broker.connect_attempts(SessionKind::Subscribe), 2);
		assert!(
			eventually(WAIT, || manager.session_state(SessionKind::Subscribe)
				== SessionState::Connected)
			.await
		);
		manager.shutdown().await;
	}

	#[tokio::test]
	async fn test_pattern_registered_while_disconnected_is_deferred() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		let registry = Arc::clone(manager.registry());

		let entry = registry.register("late/+", QoS::AtMostOnce, noop(), true).unwrap();
		assert!(!manager.subscribe_pattern(&entry).await.unwrap());
		assert!(broker.subscriptions(SessionKind::Subscribe).is_empty());

		manager.ensure_subscribe_session().await.unwrap();
		let expected = [("late/+".to_string(), QoS::AtMostOnce)];
		assert!(
			eventually(WAIT, || broker.subscriptions(SessionKind::Subscribe) == expected)
				.await
		);
		manager.shutdown().await;
	}

	#[tokio::test]
	async fn test_loop_gives_up_after_consecutive_errors() {
		let broker = InMemoryBroker::new();
		let settings = ClientSettings {
			max_consecutive_errors: 2,
			..fast_settings()
		};
		let manager = manager_with(&broker, settings);
		manager.ensure_subscribe_session().await.unwrap();

		broker.script_connects(SessionKind::Subscribe, [ConnectOutcome::Fail(
			"broker down".into(),
		)]);
		broker.drop_connections(SessionKind::Subscribe);

		tokio::time::timeout(WAIT, manager.wait_subscribe_session())
			.await
			.expect("subscribe loop should stop");
		assert!(!manager.is_subscribe_loop_running());
		assert_eq!(
			manager.session_state(SessionKind::Subscribe),
			SessionState::Disconnected
		);

		// the next subscribe restarts the session
		assert!(manager.ensure_subscribe_session().await.unwrap());
		assert!(manager.is_subscribe_loop_running());
		manager.shutdown().await;
	}

	#[tokio::test]
	async fn test_rejected_reconnect_is_retried() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		manager.registry().register("x", QoS::AtMostOnce, noop(), true).unwrap();
		manager.ensure_subscribe_session().await.unwrap();

		broker.script_connects(SessionKind::Subscribe, [
			ConnectOutcome::ConnAck(3),
			ConnectOutcome::ConnAck(5),
		]);
		broker.drop_connections(SessionKind::Subscribe);

		assert!(
			eventually(WAIT, || broker.subscriptions(SessionKind::Subscribe).len() == 1)
				.await
		);
		assert_eq!(broker.connect_attempts(SessionKind::Subscribe), 4);
		manager.shutdown().await;
	}

	#[tokio::test]
	async fn test_delivered_messages_reach_handlers() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		let received = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&received);
		let handler = handler_fn(move |_, _| {
			let counter = Arc::clone(&counter);
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Ok::<(), HandlerError>(())
			}
		});
		manager
			.registry()
			.register("sensors/#", QoS::AtMostOnce, Arc::new(handler), true)
			.unwrap();
		manager.ensure_subscribe_session().await.unwrap();
		assert!(
			eventually(WAIT, || !broker.subscriptions(SessionKind::Subscribe).is_empty())
				.await
		);

		assert_eq!(broker.deliver("sensors/1/temp", "20", QoS::AtMostOnce), 1);
		assert_eq!(broker.deliver("other", "20", QoS::AtMostOnce), 0);
		assert!(eventually(WAIT, || received.load(Ordering::SeqCst) == 1).await);

		manager.shutdown().await;
		assert!(!manager.is_subscribe_loop_running());
		assert!(!broker.is_connected(SessionKind::Subscribe));
	}

	#[tokio::test]
	async fn test_wait_returns_immediately_without_loop() {
		let broker = InMemoryBroker::new();
		let manager = manager(&broker);
		tokio::time::timeout(Duration::from_millis(100), manager.wait_subscribe_session())
			.await
			.unwrap();
	}
}

#[test]
fn test_retry_delay_doubles_and_caps() {
	let settings = ClientSettings {
		initial_retry_delay_millis: 100,
		max_retry_delay_millis: 1_000,
		..ClientSettings::default()
	};
	assert_eq!(retry_delay(&settings, 1), Duration::from_millis(100));
	assert_eq!(retry_delay(&settings, 2), Duration::from_millis(200));
	assert_eq!(retry_delay(&settings, 4), Duration::from_millis(800));
	assert_eq!(retry_delay(&settings, 5), Duration::from_millis(1_000));
	assert_eq!(retry_delay(&settings, 40), Duration::from_millis(1_000));
}
