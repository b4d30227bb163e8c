use clap::{Args, Parser, Subcommand, ValueEnum};
use mqtt_connector::{ConnectorConfig, TransportKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Exercise an MQTT broker through the connector")]
pub struct Cli {
	#[command(flatten)]
	pub broker: BrokerArgs,
	#[command(subcommand)]
	pub command: Command,
}

/// Connection options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
	/// Broker hostname or IP
	#[arg(long, env = "MQTT_HOST", default_value = "localhost", global = true)]
	pub host: String,
	/// Broker port
	#[arg(long, env = "MQTT_PORT", default_value_t = ConnectorConfig::DEFAULT_PORT, global = true)]
	pub port: u16,
	/// User name, requires --password
	#[arg(long, env = "MQTT_USERNAME", requires = "password", global = true)]
	pub username: Option<String>,
	/// Password, requires --username
	#[arg(long, env = "MQTT_PASSWORD", requires = "username", global = true)]
	pub password: Option<String>,
	/// Wire transport
	#[arg(long, env = "MQTT_TRANSPORT", value_enum, default_value_t = Transport::Tcp, global = true)]
	pub transport: Transport,
	/// Keep-alive interval in seconds
	#[arg(long, env = "MQTT_KEEPALIVE", default_value_t = ConnectorConfig::DEFAULT_KEEPALIVE, global = true)]
	pub keepalive: u64,
	/// Prefix of the per-session client identifiers
	#[arg(long, env = "MQTT_CLIENT_ID", default_value = ConnectorConfig::DEFAULT_CLIENT_ID, global = true)]
	pub client_id: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Transport {
	Tcp,
	Websockets,
}

impl BrokerArgs {
	pub fn config(&self) -> ConnectorConfig {
		let transport = match self.transport {
			| Transport::Tcp => TransportKind::Tcp,
			| Transport::Websockets => TransportKind::Websockets,
		};
		let config = ConnectorConfig::new(self.host.clone())
			.with_port(self.port)
			.with_keepalive(self.keepalive)
			.with_transport(transport)
			.with_client_id(self.client_id.clone());
		match (&self.username, &self.password) {
			| (Some(username), Some(password)) => {
				config.with_credentials(username.clone(), password.clone())
			}
			| _ => config,
		}
	}
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Publish a random value between 0 and 100 to each topic
	Test {
		/// Topics to publish to
		#[arg(long, num_args = 1..)]
		topics: Vec<String>,
		/// Seconds between rounds when looping
		#[arg(long, default_value_t = 1)]
		interval: u64,
		/// Keep publishing until interrupted
		#[arg(long = "loop")]
		repeat: bool,
		/// QoS level for the published messages
		#[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
		qos: u8,
	},
	/// Subscribe to topic patterns and log what arrives
	Listen {
		/// Topic patterns, wildcards allowed
		#[arg(long, num_args = 1.., required = true)]
		topics: Vec<String>,
		/// QoS level for the subscriptions
		#[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
		qos: u8,
		/// Hand payloads over undecoded
		#[arg(long)]
		raw: bool,
	},
	/// Connect once to verify host and credentials
	Check,
}
