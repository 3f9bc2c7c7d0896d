//! Strongly typed Entra identifiers.
//!
//! Tenant and client IDs end up in token endpoint URLs, form bodies and developer tool argument
//! vectors, so both are validated once at construction and carried around as newtypes.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $kind:literal, $charset:expr, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates `value` and wraps it.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				Self::try_from(value.as_ref().to_owned())
			}

			/// Borrows the raw identifier.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				check($kind, &value, $charset).map(|()| Self(value))
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, "{}({})", $kind, self.0)
			}
		}
	};
}

const MAX_LEN: usize = 128;

/// Rejection reasons for [`TenantId`] and [`ClientId`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Nothing was supplied.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// `Tenant` or `Client`.
		kind: &'static str,
	},
	/// Longer than Entra accepts.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// `Tenant` or `Client`.
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
	/// Whitespace or a character outside the identifier's charset.
	#[error("{kind} identifier contains {character:?}; {allowed}.")]
	InvalidCharacter {
		/// `Tenant` or `Client`.
		kind: &'static str,
		/// First offending character.
		character: char,
		/// What the identifier may contain.
		allowed: &'static str,
	},
}

/// Characters an identifier may contain.
#[derive(Clone, Copy)]
enum Charset {
	/// Anything visible.
	Printable,
	/// GUIDs, verified domains and the `organizations`/`common` aliases.
	TenantSafe,
}
impl Charset {
	fn admits(self, c: char) -> bool {
		match self {
			Self::Printable => !c.is_whitespace() && !c.is_control(),
			Self::TenantSafe => c.is_ascii_alphanumeric() || c == '.' || c == '-',
		}
	}

	fn describe(self) -> &'static str {
		match self {
			Self::Printable => "whitespace and control characters are not allowed",
			Self::TenantSafe => "only alphanumeric characters, '.' and '-' are allowed",
		}
	}
}

def_id! {
	TenantId,
	"Tenant",
	Charset::TenantSafe,
	"Entra tenant identifier (GUID, domain, or `organizations`/`common`)."
}
def_id! {
	ClientId,
	"Client",
	Charset::Printable,
	"Application (client) identifier registered in Entra."
}
impl TenantId {
	/// Tenant used by public clients when no directory is configured.
	pub fn organizations() -> Self {
		Self("organizations".into())
	}
}
impl ClientId {
	/// Azure CLI's public client, used by device code sign-in when no application is configured.
	pub fn developer_sign_on() -> Self {
		Self("04b07795-8ddb-461a-bbee-02f9e1bf7b46".into())
	}
}

fn check(kind: &'static str, raw: &str, charset: Charset) -> Result<(), IdentifierError> {
	if raw.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if raw.len() > MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: MAX_LEN });
	}

	match raw.chars().find(|c| !charset.admits(*c)) {
		Some(character) =>
			Err(IdentifierError::InvalidCharacter { kind, character, allowed: charset.describe() }),
		None => Ok(()),
	}
}
