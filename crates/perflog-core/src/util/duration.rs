//! Human-readable duration parser for CLI arguments.
//!
//! Accepts a sequence of `<number><unit>` terms (`500ms`, `2s`, `1m30s`,
//! `1.5h`) or a bare number of seconds (`10`, `0.25`).

use std::time::Duration;

/// Error type for duration parsing failures.
#[derive(Debug, Clone)]
pub struct DurationParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to parse duration '{}': {}",
            self.input, self.message
        )
    }
}

impl std::error::Error for DurationParseError {}

/// Parse a duration string.
///
/// | Unit | Example |
/// |------|---------|
/// | `ms` | `500ms` |
/// | `s`  | `2s`, `0.5s` |
/// | `m`  | `1m`, `1m30s` |
/// | `h`  | `1h` |
/// | none | `10` (seconds) |
///
/// # Examples
///
/// ```
/// use perflog_core::util::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    let err = |message: &str| DurationParseError {
        input: trimmed.to_string(),
        message: message.to_string(),
    };

    if trimmed.is_empty() {
        return Err(err("empty duration"));
    }

    if let Ok(secs) = trimmed.parse::<f64>() {
        return to_duration(secs).ok_or_else(|| err("out of range"));
    }

    let mut total = 0.0f64;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(err("expected a number"));
        }
        let value: f64 = rest[..num_len]
            .parse()
            .map_err(|_| err("invalid number"))?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(err("missing unit")),
            _ => return Err(err("unknown unit, use ms, s, m or h")),
        };
        rest = &rest[unit_len..];
        total += value * scale;
    }

    to_duration(total).ok_or_else(|| err("out of range"))
}

fn to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}
