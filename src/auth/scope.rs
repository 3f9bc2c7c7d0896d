//! Scope sets and the scope/resource conversions Azure endpoints need.
//!
//! Entra v2 endpoints speak scopes (`https://management.azure.com/.default`) while managed
//! identity endpoints and the Azure CLI speak resources (`https://management.azure.com`).
//! [`scope_to_resource`] bridges the two.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const DEFAULT_SUFFIX: &str = "/.default";

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
	/// Scopes passed to developer tools are restricted to a safe character set.
	#[error(
		"Scope {scope:?} contains invalid characters; only alphanumerics and '.', '-', '_', ':', '/' are allowed."
	)]
	InvalidCharacter {
		/// The offending scope string.
		scope: String,
	},
}

/// Sorted, deduplicated scopes of one token request.
///
/// Two requests listing the same scopes in a different order compare equal, which makes the set
/// usable as the scope component of cache and store keys.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Validates and normalizes `scopes`.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut sorted = scopes
			.into_iter()
			.map(|scope| {
				let scope = scope.into();

				if scope.is_empty() {
					Err(ScopeValidationError::Empty)
				} else if scope.chars().any(char::is_whitespace) {
					Err(ScopeValidationError::ContainsWhitespace { scope })
				} else {
					Ok(scope)
				}
			})
			.collect::<Result<Vec<_>, _>>()?;

		sorted.sort_unstable();
		sorted.dedup();

		Ok(Self(sorted.into()))
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns `true` if `scope` is part of the set.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Scopes in sorted order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Space-delimited form sent in the `scope` form field.
	pub fn normalized(&self) -> String {
		self.0.join(" ")
	}

	/// Base64 (no padding) SHA-256 of [`Self::normalized`]; stable across processes.
	pub fn fingerprint(&self) -> String {
		STANDARD_NO_PAD.encode(Sha256::digest(self.normalized().as_bytes()))
	}

	/// Returns the resource for a single-scope set.
	///
	/// Managed identity and the Azure CLI accept exactly one resource per request.
	pub fn single_resource(&self) -> Option<&str> {
		match &*self.0 {
			[scope] => Some(scope_to_resource(scope)),
			_ => None,
		}
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_list().entries(self.iter()).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<ScopeSet> for Vec<String> {
	fn from(value: ScopeSet) -> Self {
		value.0.to_vec()
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"" => Ok(Self::default()),
			s if s.trim().is_empty() => Err(ScopeValidationError::Empty),
			s => Self::new(s.split_whitespace()),
		}
	}
}

/// Strips the `/.default` suffix, turning a v2 scope into a v1 resource.
pub fn scope_to_resource(scope: &str) -> &str {
	scope.strip_suffix(DEFAULT_SUFFIX).unwrap_or(scope)
}

/// Appends `/.default` to a resource unless it already ends with it.
pub fn resource_to_scope(resource: &str) -> String {
	if resource.ends_with(DEFAULT_SUFFIX) {
		resource.to_owned()
	} else {
		format!("{}{DEFAULT_SUFFIX}", resource.trim_end_matches('/'))
	}
}

/// Validates that a scope only uses characters safe to pass to a developer tool.
pub fn validate_tool_scope(scope: &str) -> Result<(), ScopeValidationError> {
	if scope.is_empty() {
		return Err(ScopeValidationError::Empty);
	}
	if scope
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/'))
	{
		Ok(())
	} else {
		Err(ScopeValidationError::InvalidCharacter { scope: scope.to_owned() })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_normalize_and_hash_stably() {
		let lhs = ScopeSet::new([
			"https://vault.azure.net/.default",
			"https://graph.microsoft.com/.default",
			"https://vault.azure.net/.default",
		])
		.expect("Left-hand scope set should be valid.");
		let rhs = ScopeSet::new([
			"https://graph.microsoft.com/.default",
			"https://vault.azure.net/.default",
		])
		.expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.len(), 2);
		assert_eq!(lhs.fingerprint(), rhs.fingerprint());
		assert!(lhs.contains("https://graph.microsoft.com/.default"));
		assert_eq!(
			serde_json::to_string(&lhs).expect("Scope set should serialize."),
			r#"["https://graph.microsoft.com/.default","https://vault.azure.net/.default"]"#
		);
		assert!(serde_json::from_str::<ScopeSet>(r#"["a b"]"#).is_err());
	}

	#[test]
	fn scopes_reject_whitespace_padding() {
		let err = ScopeSet::new([" profile "]).expect_err("Padded scopes must be rejected.");

		assert!(matches!(err, ScopeValidationError::ContainsWhitespace { .. }));
		assert!(ScopeSet::from_str("").is_ok(), "Empty string represents an empty scope set.");
		assert!(ScopeSet::from_str("   ").is_err(), "Whitespace-only input must be rejected.");
		assert!(ScopeSet::new([""]).is_err());
	}

	#[test]
	fn resource_conversions() {
		assert_eq!(
			scope_to_resource("https://management.azure.com/.default"),
			"https://management.azure.com"
		);
		assert_eq!(
			scope_to_resource("api://app/user_impersonation"),
			"api://app/user_impersonation"
		);
		assert_eq!(
			resource_to_scope("https://management.azure.com/"),
			"https://management.azure.com/.default"
		);
		assert_eq!(resource_to_scope("https://x/.default"), "https://x/.default");

		let single = ScopeSet::new(["https://storage.azure.com/.default"])
			.expect("Single scope fixture should be valid.");

		assert_eq!(single.single_resource(), Some("https://storage.azure.com"));

		let double = ScopeSet::from_str("a b").expect("Two-scope fixture should be valid.");

		assert_eq!(double.single_resource(), None);
	}

	#[test]
	fn tool_scope_validation_blocks_injection() {
		validate_tool_scope("https://management.core.windows.net//.default")
			.expect("Management scope should be accepted.");

		for bad in ["https://x/.default;ls", "a'b", "x\"y", "a&b", "$(id)"] {
			assert!(
				matches!(
					validate_tool_scope(bad),
					Err(ScopeValidationError::InvalidCharacter { .. })
				),
				"{bad}"
			);
		}
	}
}
