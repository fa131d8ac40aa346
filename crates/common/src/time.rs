//! Wall-clock helpers for frame timestamps.
//!
//! Monotonic bookkeeping (liveness, deadlines) uses `std::time::Instant`
//! directly at the call sites; these helpers only cover the wall-clock
//! timestamps that go over the wire or into HTTP responses.

use chrono::{SecondsFormat, Utc};

/// Current wall-clock time as an RFC 3339 string with millisecond precision.
///
/// Every frame sent to a client carries one of these.
#[must_use]
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current unix time in whole seconds, as used by OpenAI `created` fields.
#[must_use]
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Compact wall-clock stamp safe for use in filenames (`YYYYMMDD_HHMMSS_micros`).
#[must_use]
pub fn file_stamp_now() -> String {
    Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string()
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_is_parseable() {
        let ts = rfc3339_now();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn unix_now_is_past_2024() {
        assert!(unix_now() > 1_704_067_200);
    }

    #[test]
    fn file_stamp_has_no_separators() {
        let stamp = file_stamp_now();
        assert!(!stamp.contains(':'));
        assert!(!stamp.contains('/'));
    }
}
