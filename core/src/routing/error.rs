use thiserror::Error;

use crate::connection::TransportError;
use crate::topic::TopicPatternError;

/// Errors during subscription operations
#[derive(Debug, Error)]
pub enum SubscriptionError {
	/// Pattern failed to compile; nothing was registered
	#[error("Invalid subscription pattern: {0}")]
	InvalidPattern(#[from] TopicPatternError),
	/// Broker-level subscribe request could not be issued
	#[error("Failed to subscribe to '{pattern}': {source}")]
	SubscribeFailed {
		/// Pattern that failed
		pattern: String,
		/// Underlying transport failure
		#[source]
		source: TransportError,
	},
	/// Some patterns could not be resubscribed after a reconnect
	#[error("Failed to resubscribe {failed} of {total} patterns after reconnect")]
	ResubscribeFailed {
		/// Number of failed patterns
		failed: usize,
		/// Number of registered patterns
		total: usize,
	},
}
