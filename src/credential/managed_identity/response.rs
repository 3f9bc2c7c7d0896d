// Managed identity token responses.
//
// Endpoints disagree on how they encode expiry: IMDS sends `expires_on` as a numeric string,
// some hosts send a JSON number, and App Service 2017 sends a locale formatted date.

// crates.io
use serde_json::Value;
use time::{format_description::BorrowedFormatItem, macros::format_description};
// self
use crate::{_prelude::*, auth::AccessToken};

const APP_SERVICE_DATE: &[BorrowedFormatItem<'static>] = format_description!(
	"[month padding:none]/[day padding:none]/[year] [hour padding:none]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
);

#[derive(Debug, Deserialize)]
struct RawToken {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	expires_on: Option<Value>,
	#[serde(default)]
	expires_in: Option<Value>,
}

/// Decodes a token response body, measuring relative expiry from `now`.
pub(crate) fn parse_token(body: &[u8], now: OffsetDateTime) -> Result<AccessToken, String> {
	let de = &mut serde_json::Deserializer::from_slice(body);
	let raw: RawToken = serde_path_to_error::deserialize(de)
		.map_err(|e| format!("unexpected response {:?}: {e}", String::from_utf8_lossy(body)))?;
	let token = raw
		.access_token
		.filter(|token| !token.is_empty())
		.ok_or_else(|| "response didn't contain an access token".to_owned())?;
	let expires_on = match raw.expires_on.as_ref().map(absolute_expiry).transpose()?.flatten() {
		Some(instant) => instant,
		None => match raw.expires_in.as_ref().map(seconds).transpose()?.flatten() {
			Some(secs) => now + Duration::seconds(secs),
			None => return Err("response didn't contain an expiry".into()),
		},
	};

	Ok(AccessToken::new(token, expires_on))
}

fn absolute_expiry(value: &Value) -> Result<Option<OffsetDateTime>, String> {
	if let Value::String(raw) = value
		&& !raw.is_empty()
		&& !raw.bytes().all(|b| b.is_ascii_digit())
	{
		return app_service_date(raw).map(Some);
	}

	match seconds(value)? {
		Some(secs) => OffsetDateTime::from_unix_timestamp(secs)
			.map(Some)
			.map_err(|e| format!("expires_on {secs} is out of range: {e}")),
		None => Ok(None),
	}
}

// A JSON number or numeric string; empty strings and null count as absent.
fn seconds(value: &Value) -> Result<Option<i64>, String> {
	match value {
		Value::Null => Ok(None),
		Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| format!("invalid expiry {n}")),
		Value::String(raw) if raw.is_empty() => Ok(None),
		Value::String(raw) => raw.parse().map(Some).map_err(|_| format!("invalid expiry {raw:?}")),
		other => Err(format!("invalid expiry {other}")),
	}
}

// `9/14/2017 00:00:00 PM +00:00`; the AM/PM marker is optional.
fn app_service_date(raw: &str) -> Result<OffsetDateTime, String> {
	let invalid = || format!("invalid expires_on {raw:?}");
	let mut parts = raw.split_whitespace().collect::<Vec<_>>();
	let meridiem = match parts.as_slice() {
		[_, _, marker, _] if marker.eq_ignore_ascii_case("AM") => Some(false),
		[_, _, marker, _] if marker.eq_ignore_ascii_case("PM") => Some(true),
		[_, _, _] => None,
		_ => return Err(invalid()),
	};

	if meridiem.is_some() {
		parts.remove(2);
	}

	let parsed = OffsetDateTime::parse(&parts.join(" "), APP_SERVICE_DATE).map_err(|_| invalid())?;

	Ok(match meridiem {
		Some(true) if parsed.hour() < 12 => parsed + Duration::hours(12),
		Some(false) if parsed.hour() == 12 => parsed - Duration::hours(12),
		_ => parsed,
	})
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const NOW: OffsetDateTime = macros::datetime!(2019-06-19 19:00 UTC);

	fn parse(body: &str) -> Result<AccessToken, String> {
		parse_token(body.as_bytes(), NOW)
	}

	#[test]
	fn numeric_expiry_forms() {
		let expected = OffsetDateTime::from_unix_timestamp(1_560_974_028)
			.expect("Fixture timestamp should be valid.");

		for body in [
			r#"{"access_token":"t","expires_on":"1560974028"}"#,
			r#"{"access_token":"t","expires_on":1560974028}"#,
			r#"{"access_token":"t","expires_on":"1560974028","expires_in":""}"#,
		] {
			let token = parse(body).expect("Numeric expiry should parse.");

			assert_eq!(token.expires_on, expected, "{body}");
			assert_eq!(token.token.expose(), "t");
		}

		let token = parse(r#"{"access_token":"t","expires_in":"3600"}"#)
			.expect("Relative expiry should parse.");

		assert_eq!(token.expires_on, NOW + Duration::hours(1));

		let token = parse(r#"{"access_token":"t","expires_on":"","expires_in":60}"#)
			.expect("Empty expires_on falls back to expires_in.");

		assert_eq!(token.expires_on, NOW + Duration::minutes(1));
	}

	#[test]
	fn app_service_dates() {
		let token = parse(r#"{"access_token":"t","expires_on":"9/14/2017 00:00:00 PM +00:00"}"#)
			.expect("Twelve hour dates should parse.");

		assert_eq!(token.expires_on, macros::datetime!(2017-09-14 12:00 UTC));

		let token = parse(r#"{"access_token":"t","expires_on":"09/14/2017 00:00:00 +00:00"}"#)
			.expect("Twenty-four hour dates should parse.");

		assert_eq!(token.expires_on, macros::datetime!(2017-09-14 00:00 UTC));

		let token = parse(r#"{"access_token":"t","expires_on":"9/14/2017 12:30:00 AM +02:00"}"#)
			.expect("Midnight in twelve hour form should parse.");

		assert_eq!(token.expires_on, macros::datetime!(2017-09-13 22:30 UTC));
	}

	#[test]
	fn malformed_responses() {
		for body in [
			r#"{"access_token":"t","expires_on":"15609740s28"}"#,
			r#"{"access_token":"t"}"#,
			r#"{"expires_on":"1560974028"}"#,
			r#"{"access_token":"t","expires_in":true}"#,
			"not json",
		] {
			assert!(parse(body).is_err(), "{body}");
		}
	}
}
