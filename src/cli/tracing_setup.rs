use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the fmt subscriber.
///
/// `.env` is loaded first so `RUST_LOG` can live there. `RUST_LOG_DISABLE`
/// turns logging off; otherwise the filter comes from `RUST_LOG` and falls
/// back to `info`.
pub fn setup() {
	dotenv::dotenv().ok();

	if std::env::var("RUST_LOG_DISABLE").is_ok() {
		return;
	}

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

	tracing_subscriber::registry()
		.with(filter)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.with_file(false)
				.with_line_number(false)
				.compact(),
		)
		.init();
}
