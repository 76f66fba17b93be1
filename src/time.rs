//! Parsing of user-supplied start and end times.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use humantime_serde::re::humantime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeParseError {
    #[error(
        "unrecognized time '{0}' (expected 'now', RFC 3339, 'YYYY-MM-DD[ HH:MM[:SS]]', \
         a relative offset like '-15m', or epoch milliseconds)"
    )]
    Unrecognized(String),

    #[error("invalid relative time '{value}': {source}")]
    Relative {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("time '{0}' is out of range")]
    OutOfRange(String),

    #[error("local time '{0}' is ambiguous or does not exist in this timezone")]
    AmbiguousLocal(String),
}

const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse an instant relative to `now`.
///
/// Accepts `now`, RFC 3339 (`2024-05-01T12:00:00Z`), signed humantime
/// offsets (`-15m`, `+1h 30m`), zone-less local datetimes and dates, and
/// epoch milliseconds.
pub fn parse_instant(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, TimeParseError> {
    let value = value.trim();

    if value.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Some((sign, offset)) = value
        .strip_prefix('-')
        .map(|rest| (-1, rest))
        .or_else(|| value.strip_prefix('+').map(|rest| (1, rest)))
    {
        return parse_relative(value, sign, offset, now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = value
            .parse()
            .map_err(|_| TimeParseError::OutOfRange(value.to_string()))?;
        return Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| TimeParseError::OutOfRange(value.to_string()));
    }

    let naive = LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| TimeParseError::Unrecognized(value.to_string()))?;

    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TimeParseError::AmbiguousLocal(value.to_string()))
}

fn parse_relative(
    value: &str,
    sign: i32,
    offset: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, TimeParseError> {
    let duration =
        humantime::parse_duration(offset.trim()).map_err(|source| TimeParseError::Relative {
            value: value.to_string(),
            source,
        })?;
    let delta = chrono::Duration::from_std(duration)
        .map_err(|_| TimeParseError::OutOfRange(value.to_string()))?;

    let shifted = if sign < 0 {
        now.checked_sub_signed(delta)
    } else {
        now.checked_add_signed(delta)
    };
    shifted.ok_or_else(|| TimeParseError::OutOfRange(value.to_string()))
}

/// Parse an optional end time. Absent, empty or `open` means no end.
pub fn parse_end(
    value: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, TimeParseError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("open") => Ok(None),
        Some(v) => parse_instant(v, now).map(Some),
    }
}
