//! Redacting wrapper for bearer tokens, refresh tokens, and client secrets.

// self
use crate::_prelude::*;

const REDACTED: &str = "<redacted>";

/// Secret string that prints as `<redacted>` under both `Debug` and `Display`.
///
/// Only [`TokenSecret::expose`] reveals the value, so every place a secret leaves the crate
/// (a form body, an `Authorization` header) is greppable.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps `value`.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// The raw secret.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` for an empty secret, which Entra never issues.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenSecret({REDACTED})")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(REDACTED)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatting_never_reveals_the_value() {
		let secret = TokenSecret::from("eyJ0eXAiOiJKV1QifQ.payload.signature");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
		assert_eq!(secret.to_string(), "<redacted>");
		assert_eq!(secret.expose(), "eyJ0eXAiOiJKV1QifQ.payload.signature");
		assert_eq!(
			serde_json::to_string(&secret).expect("Secret should serialize."),
			"\"eyJ0eXAiOiJKV1QifQ.payload.signature\""
		);
		assert!(TokenSecret::new("").is_empty());
	}
}
