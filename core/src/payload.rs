//! Payload encoding and decoding.
//!
//! Inbound payloads are classified once, at the dispatch boundary, into a
//! [`Payload`] variant. Handlers match on the variant instead of inspecting
//! JSON values again.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Decoded inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
	/// JSON object
	Mapping(Map<String, Value>),
	/// JSON number, string or boolean
	Scalar(Value),
	/// Any other JSON value (arrays, `null`)
	Other(Value),
	/// Undecoded payload bytes
	Bytes(Bytes),
}

impl Payload {
	/// Classifies a decoded JSON value.
	pub fn from_value(value: Value) -> Self {
		match value {
			| Value::Object(map) => Payload::Mapping(map),
			| scalar @ (Value::Number(_) | Value::String(_) | Value::Bool(_)) => {
				Payload::Scalar(scalar)
			}
			| other => Payload::Other(other),
		}
	}

	/// Short name of the variant, for logging.
	pub fn kind(&self) -> &'static str {
		match self {
			| Payload::Mapping(_) => "mapping",
			| Payload::Scalar(_) => "scalar",
			| Payload::Other(_) => "other",
			| Payload::Bytes(_) => "bytes",
		}
	}
}

/// Payload bytes could not be decoded as UTF-8 JSON.
#[derive(Debug, Error)]
pub enum DecodeError {
	/// Payload is not valid UTF-8
	#[error("payload is not valid UTF-8: {0}")]
	Utf8(#[from] std::str::Utf8Error),
	/// Payload is UTF-8 but not valid JSON
	#[error("payload is not valid JSON: {0}")]
	Json(#[from] serde_json::Error),
}

/// Outbound payload could not be serialized as JSON.
#[derive(Debug, Error)]
#[error("failed to encode payload as JSON: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

/// Interprets payload bytes as UTF-8 text and parses it as JSON.
pub fn decode_json(bytes: &[u8]) -> Result<Payload, DecodeError> {
	let text = std::str::from_utf8(bytes)?;
	let value = serde_json::from_str::<Value>(text)?;
	Ok(Payload::from_value(value))
}

/// Serializes an outbound payload as JSON.
pub fn encode_json<T>(data: &T) -> Result<Bytes, EncodeError>
where T: Serialize + ?Sized {
	Ok(Bytes::from(serde_json::to_vec(data)?))
}

#[cfg(test)]
mod tests {
	use serde::Serializer;
	use serde_json::json;

	use super::*;

	struct Unserializable;

	impl Serialize for Unserializable {
		fn serialize<S: Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
			Err(serde::ser::Error::custom("not serializable"))
		}
	}

	#[test]
	fn test_decode_classifies_values() {
		assert!(matches!(decode_json(br#"{"a":1}"#), Ok(Payload::Mapping(_))));
		assert_eq!(decode_json(b"42").unwrap(), Payload::Scalar(json!(42)));
		assert_eq!(decode_json(b"\"on\"").unwrap(), Payload::Scalar(json!("on")));
		assert_eq!(decode_json(b"true").unwrap(), Payload::Scalar(json!(true)));
		assert_eq!(decode_json(b"[1,2]").unwrap(), Payload::Other(json!([1, 2])));
		assert_eq!(decode_json(b"null").unwrap(), Payload::Other(Value::Null));
	}

	#[test]
	fn test_decode_errors() {
		assert!(matches!(decode_json(&[0xff, 0xfe]), Err(DecodeError::Utf8(_))));
		assert!(matches!(decode_json(b"{not json"), Err(DecodeError::Json(_))));
		assert!(matches!(decode_json(b""), Err(DecodeError::Json(_))));
	}

	#[test]
	fn test_encode_json() {
		let bytes = encode_json(&json!({"a": 1})).unwrap();
		assert_eq!(&bytes[..], br#"{"a":1}"#);

		assert!(encode_json(&Unserializable).is_err());
	}
}
