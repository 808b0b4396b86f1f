//! Wall-clock and TTL renderings shared by the dump and parse paths.
//!
//! Deletion times and expiry points are epoch seconds rendered as
//! `YYYY-MM-DD HH:MM:SS` in UTC; write timestamps stay raw int64
//! microseconds. TTLs render with a trailing `s`, and parse with or
//! without it.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Render epoch seconds in the UTC date form.
pub(crate) fn format_epoch_seconds(secs: i64) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        // Out of chrono's range; fall back to the raw number.
        None => secs.to_string(),
    }
}

/// Parse the UTC date form, or raw epoch seconds.
pub(crate) fn parse_epoch_seconds(s: &str) -> Result<i64, String> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }
    s.parse::<i64>()
        .map_err(|_| format!("not a date or epoch seconds: {s:?}"))
}

/// Render a TTL in seconds as `"Ns"`.
pub(crate) fn format_ttl(ttl: u64) -> String {
    format!("{ttl}s")
}

/// Parse a TTL, accepting an optional trailing `s`.
pub(crate) fn parse_ttl(s: &str) -> Result<u64, String> {
    s.strip_suffix('s')
        .unwrap_or(s)
        .parse::<u64>()
        .map_err(|_| format!("bad ttl value {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_form_round_trips() {
        assert_eq!(format_epoch_seconds(1577836800), "2020-01-01 00:00:00");
        assert_eq!(parse_epoch_seconds("2020-01-01 00:00:00").unwrap(), 1577836800);
        assert_eq!(parse_epoch_seconds("1577836800").unwrap(), 1577836800);
        assert!(parse_epoch_seconds("next tuesday").is_err());
    }

    #[test]
    fn ttl_suffix_is_optional_on_parse() {
        assert_eq!(format_ttl(30), "30s");
        assert_eq!(parse_ttl("30s").unwrap(), 30);
        assert_eq!(parse_ttl("30").unwrap(), 30);
        assert!(parse_ttl("s").is_err());
    }
}
