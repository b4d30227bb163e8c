use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use mqtt_connector::prelude::*;
use mqtt_connector::client::qos_level;
use rand::Rng;
use tracing::{info, warn};

use super::args::{Cli, Command};

pub async fn run(cli: Cli) -> Result<()> {
	let config = cli.broker.config();
	let connector = MqttConnector::new(config).context("invalid broker options")?;

	let outcome = match cli.command {
		| Command::Test {
			topics,
			interval,
			repeat,
			qos,
		} => emit(&connector, &topics, interval, repeat, qos).await,
		| Command::Listen { topics, qos, raw } => {
			listen(&connector, &topics, qos, raw).await
		}
		| Command::Check => check(&connector).await,
	};

	connector.shutdown().await.context("shutdown")?;
	outcome
}

/// Publishes a random value to every topic, once or until interrupted.
async fn emit(
	connector: &MqttConnector,
	topics: &[String],
	interval: u64,
	repeat: bool,
	qos: u8,
) -> Result<()> {
	if topics.is_empty() {
		bail!("Provide `--topics` for this action.");
	}
	let qos = qos_level(qos)?;
	let mut emitted = 0usize;

	loop {
		for topic in topics {
			let value: u8 = rand::rng().random_range(0 ..= 100);
			let result = connector.publish(topic, &value, qos).await;
			if result.is_success() {
				emitted += 1;
				info!("Emitted '{value}' to '{topic}'.");
			} else {
				warn!(topic = %topic, detail = %result.detail, "Emit failed");
			}
		}
		if !repeat {
			break;
		}
		info!("Sleep for {interval} seconds...");
		tokio::select! {
			_ = tokio::time::sleep(Duration::from_secs(interval)) => {}
			_ = tokio::signal::ctrl_c() => break,
		}
	}

	info!("Emitted {emitted} messages.");
	Ok(())
}

async fn listen(
	connector: &MqttConnector,
	topics: &[String],
	qos: u8,
	raw: bool,
) -> Result<()> {
	let options = SubscribeOptions::new()
		.with_qos(qos_level(qos)?)
		.with_decode_payload(!raw);
	let handler: Arc<dyn MessageHandler> =
		Arc::new(handler_fn(|topic, payload| async move {
			info!(topic = %topic, payload = ?payload, "Received message");
			Ok::<(), HandlerError>(())
		}));

	for pattern in topics {
		connector
			.subscribe(pattern, Arc::clone(&handler), options)
			.await
			.with_context(|| format!("subscribe to '{pattern}'"))?;
	}

	info!(topics = ?topics, "Listening, press Ctrl-C to stop");
	tokio::signal::ctrl_c().await.context("wait for Ctrl-C")?;
	Ok(())
}

async fn check(connector: &MqttConnector) -> Result<()> {
	let config = connector.config();
	connector
		.connect()
		.await
		.with_context(|| format!("connect to {}:{}", config.host, config.port))?;
	info!(host = %config.host, port = config.port, "Broker accepted the connection");
	Ok(())
}
