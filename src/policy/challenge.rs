//! `WWW-Authenticate` parsing and continuous access evaluation (CAE) claims challenges.

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
// self
use crate::{_prelude::*, error::ConfigError};

/// One authentication challenge: a scheme plus its parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Challenge {
	/// Scheme as sent by the server (`Bearer`, `Basic`, ...).
	pub scheme: String,
	/// Parameters keyed by lowercase name.
	pub params: BTreeMap<String, String>,
}
impl Challenge {
	/// Returns `true` if the scheme matches, ignoring case.
	pub fn is_scheme(&self, scheme: &str) -> bool {
		self.scheme.eq_ignore_ascii_case(scheme)
	}

	/// Looks up a parameter by name, ignoring case.
	pub fn param(&self, name: &str) -> Option<&str> {
		self.params.get(&name.to_ascii_lowercase()).map(String::as_str)
	}
}

/// Parses a `WWW-Authenticate` value that may carry several challenges.
pub fn parse_challenges(raw: &str) -> Result<Vec<Challenge>, ConfigError> {
	let mut challenges = <Vec<Challenge>>::new();
	let mut rest = raw;

	loop {
		rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());

		if rest.is_empty() {
			break;
		}

		let end =
			rest.find(|c: char| c == ',' || c == '=' || c.is_whitespace()).unwrap_or(rest.len());
		let (name, after) = rest.split_at(end);
		let after_trimmed = after.trim_start();

		if let Some(value_part) = after_trimmed.strip_prefix('=') {
			let Some(current) = challenges.last_mut() else {
				return Err(invalid("a parameter appears before any scheme"));
			};
			let (value, remaining) = read_value(value_part.trim_start())?;

			current.params.insert(name.to_ascii_lowercase(), value);

			rest = remaining;
		} else {
			challenges.push(Challenge { scheme: name.to_owned(), params: BTreeMap::new() });

			rest = after;
		}
	}

	Ok(challenges)
}

/// Collects every challenge from all `WWW-Authenticate` headers in `headers`.
pub fn challenges_from_headers(headers: &HeaderMap) -> Result<Vec<Challenge>, ConfigError> {
	let mut all = Vec::new();

	for value in headers.get_all(WWW_AUTHENTICATE) {
		let raw = value.to_str().map_err(|_| invalid("header is not valid ASCII"))?;

		all.extend(parse_challenges(raw)?);
	}

	Ok(all)
}

/// Extracts the decoded claims of a CAE `insufficient_claims` Bearer challenge.
///
/// Returns `Ok(None)` when no such challenge is present, so other challenges pass through to
/// the caller untouched.
pub fn insufficient_claims(headers: &HeaderMap) -> Result<Option<String>, ConfigError> {
	let challenges = challenges_from_headers(headers)?;
	let Some(encoded) = challenges
		.iter()
		.filter(|c| c.is_scheme("Bearer"))
		.filter(|c| c.param("error") == Some("insufficient_claims"))
		.find_map(|c| c.param("claims"))
	else {
		return Ok(None);
	};

	decode_claims(encoded).map(Some)
}

/// Decodes base64 (standard or URL-safe, padding optional) claims into a JSON string.
pub fn decode_claims(encoded: &str) -> Result<String, ConfigError> {
	let trimmed = encoded.trim().trim_end_matches('=');
	let bytes = STANDARD_NO_PAD
		.decode(trimmed)
		.or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
		.map_err(|_| invalid("claims are not valid base64"))?;
	let claims = String::from_utf8(bytes).map_err(|_| invalid("claims are not valid UTF-8"))?;

	if claims.is_empty() {
		return Err(invalid("claims are empty"));
	}

	Ok(claims)
}

fn read_value(input: &str) -> Result<(String, &str), ConfigError> {
	let Some(quoted) = input.strip_prefix('"') else {
		let end = input.find(|c: char| c == ',' || c.is_whitespace()).unwrap_or(input.len());

		return Ok((input[..end].to_owned(), &input[end..]));
	};
	let mut value = String::new();
	let mut chars = quoted.char_indices();

	while let Some((idx, c)) = chars.next() {
		match c {
			'\\' => match chars.next() {
				Some((_, escaped)) => value.push(escaped),
				None => break,
			},
			'"' => return Ok((value, &quoted[idx + 1..])),
			other => value.push(other),
		}
	}

	Err(invalid("a quoted parameter is not terminated"))
}

fn invalid(reason: &str) -> ConfigError {
	ConfigError::InvalidChallenge { reason: reason.to_owned() }
}
