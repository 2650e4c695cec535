use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Reads `Retry-After` from response headers, in whole seconds from now.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| parse_retry_after(value, Utc::now()))
}

/// Parses a `Retry-After` value relative to `now`.
///
/// Accepts delay-seconds (`"120"`) or an HTTP-date (`"Wed, 21 Oct 2015 07:28:00 GMT"`).
/// Dates in the past and negative delays yield `Some(0)`; anything unparseable yields
/// `None`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use relaycore::executor::parse_retry_after;
///
/// let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();
/// assert_eq!(parse_retry_after("30", now), Some(30));
/// assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now), Some(60));
/// assert_eq!(parse_retry_after("soon", now), None);
/// ```
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<i64>() {
        return Some(u64::try_from(seconds).unwrap_or(0));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let remaining = at.with_timezone(&Utc).signed_duration_since(now).num_seconds();
    Some(u64::try_from(remaining).unwrap_or(0))
}
