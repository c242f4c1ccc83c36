//! `Expires` / `Last-Modified` stamping shared by hits and misses.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::Response;

pub(crate) const EXPIRES: &str = "Expires";
pub(crate) const LAST_MODIFIED: &str = "Last-Modified";

/// Formats a timestamp as an HTTP-date (IMF-fixdate), e.g.
/// `Tue, 14 Nov 2023 22:13:20 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `now + ttl`, saturating at the latest representable instant.
pub(crate) fn expires_at(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Sets both freshness headers, replacing any the handler wrote.
pub(crate) fn stamp(response: &mut Response, expires: DateTime<Utc>, last_modified: DateTime<Utc>) {
    response.set_header(EXPIRES, http_date(expires));
    response.set_header(LAST_MODIFIED, http_date(last_modified));
}
