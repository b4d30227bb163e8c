use thiserror::Error;

use super::transport::{CONNACK_NOT_AUTHORIZED, TransportError};

/// Failure to bring a session into the connected state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
	#[error("Network connection failed: {0}")]
	Network(#[from] TransportError),

	#[error("Broker rejected connection with code {code}{}", rejection_hint(.code))]
	BrokerRejected { code: u8 },

	#[error("Connection establishment timed out after {timeout_millis}ms")]
	Timeout { timeout_millis: u64 },

	#[error("Connector is shut down")]
	Shutdown,
}

impl ConnectError {
	/// Broker return code, if the broker answered at all.
	pub fn return_code(&self) -> Option<u8> {
		match self {
			| ConnectError::BrokerRejected { code } => Some(*code),
			| _ => None,
		}
	}
}

pub(crate) fn rejection_hint(code: &u8) -> &'static str {
	if *code == CONNACK_NOT_AUTHORIZED {
		" (not authorized: check username and password)"
	} else {
		""
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_not_authorized_carries_credential_hint() {
		let err = ConnectError::BrokerRejected { code: 5 };
		assert!(err.to_string().contains("check username and password"));
		assert_eq!(err.return_code(), Some(5));

		let err = ConnectError::BrokerRejected { code: 3 };
		assert_eq!(err.to_string(), "Broker rejected connection with code 3");
	}
}
