//! Timestamp normalization for last-writer-wins comparisons.
//!
//! The two stores serialize `last_changed` differently: one side emits an
//! explicit UTC offset, the other a `Z` suffix, and older rows may carry
//! second precision only or a naive datetime. Normalization parses any of
//! these to an absolute instant so comparisons never depend on the
//! serialized form.

use crate::config::MissingTimestampPolicy;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Normalizes a raw `last_changed` value to an absolute instant.
///
/// A missing or unparseable value resolves per `policy`:
/// [`MissingTimestampPolicy::AssumeFresh`] yields `now` (the row wins
/// against any older counterpart), [`MissingTimestampPolicy::AssumeEpoch`]
/// yields the Unix epoch (the row loses to any real timestamp).
pub fn normalize(raw: Option<&str>, policy: MissingTimestampPolicy) -> DateTime<Utc> {
    raw.and_then(parse).unwrap_or_else(|| match policy {
        MissingTimestampPolicy::AssumeFresh => Utc::now(),
        MissingTimestampPolicy::AssumeEpoch => DateTime::<Utc>::UNIX_EPOCH,
    })
}

/// Re-serializes an instant to the canonical wire form:
/// RFC 3339 UTC with millisecond precision and a `Z` suffix.
pub fn canonical(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// The canonical form of "now".
pub fn now() -> String {
    canonical(Utc::now())
}

fn parse(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    // Naive datetime (no offset) is taken as UTC; some backends emit a
    // space separator instead of 'T'.
    let candidate = raw.replacen(' ', "T", 1);
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&candidate, format) {
            return Some(naive.and_utc());
        }
    }
    None
}
