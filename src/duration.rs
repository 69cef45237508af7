//! Duration strings as written in channel headers and settings.
//!
//! The accepted syntax is a sequence of decimal numbers, each with an optional
//! fraction and a mandatory unit suffix, such as `300ms`, `1.5s` or `2h45m`.
//! Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `0`
//! needs no unit. Values are limited to what fits in a signed 64-bit count of
//! nanoseconds (about 292 years). A negative duration parses as zero, since no
//! interval between posts can be shorter than that.

use std::time::Duration;

use crate::error::{Result, SlowmodeError};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Largest representable duration in nanoseconds.
const MAX_NANOS: u128 = i64::MAX as u128;

/// Longest fraction we keep; more digits cannot change a nanosecond result.
const MAX_FRACTION_DIGITS: usize = 18;

/// Parse a duration string into a [`Duration`].
pub fn parse(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| SlowmodeError::InvalidDuration(format!("{:?}: {}", input, reason));

    let mut s = input.trim();
    let mut negative = false;
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, rest) = s.split_at(int_len);
        s = rest;

        let mut fraction = "";
        if let Some(rest) = s.strip_prefix('.') {
            let frac_len = rest.bytes().take_while(u8::is_ascii_digit).count();
            fraction = &rest[..frac_len];
            s = &rest[frac_len..];
        }
        if int_part.is_empty() && fraction.is_empty() {
            return Err(invalid("expected a number"));
        }

        let unit_len = s
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(s.len());
        let (unit, rest) = s.split_at(unit_len);
        s = rest;

        let scale = unit_scale(unit).ok_or_else(|| {
            if unit.is_empty() {
                invalid("missing unit")
            } else {
                invalid(&format!("unknown unit {:?}", unit))
            }
        })?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid("number out of range"))?
        };
        let mut nanos = whole
            .checked_mul(scale)
            .ok_or_else(|| invalid("number out of range"))?;

        if !fraction.is_empty() {
            let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
            // digits is non-empty and all ASCII digits, so this cannot fail
            let value: u128 = digits.parse().unwrap_or(0);
            let divisor = 10u128.pow(digits.len() as u32);
            nanos += value * scale / divisor;
        }

        total = total
            .checked_add(nanos)
            .ok_or_else(|| invalid("number out of range"))?;
    }

    if total > MAX_NANOS {
        return Err(invalid("number out of range"));
    }
    if negative {
        return Ok(Duration::ZERO);
    }

    Ok(Duration::from_nanos(total as u64))
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Round to the nearest whole second, halves rounding up.
pub fn round_to_secs(duration: Duration) -> Duration {
    let secs = (duration.as_nanos() + NANOS_PER_SEC / 2) / NANOS_PER_SEC;
    Duration::from_secs(secs as u64)
}

/// Render a wait time for users: rounded to whole seconds, compact `1h2m3s` form.
pub fn format_wait(duration: Duration) -> String {
    let total = round_to_secs(duration).as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
