//! Cron Expressions
//!
//! Accepts standard 5-field Unix cron expressions (minute, hour,
//! day-of-month, month, day-of-week) and converts them to the 6-field
//! format (with seconds) used by the `cron` crate. Expressions are
//! evaluated in a fixed UTC offset.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;

use crate::error::{EngineError, Result};

/// Parsed cron expression bound to a timezone.
#[derive(Debug, Clone)]
pub struct CronSpec {
    schedule: Schedule,
    offset: FixedOffset,
}

impl CronSpec {
    pub fn parse(expression: &str, timezone: &str) -> Result<Self> {
        let normalized = normalize_cron_expr(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            EngineError::validation(format!("Invalid cron expression '{}': {}", expression, e))
        })?;
        let offset = parse_timezone(timezone)?;
        Ok(Self { schedule, offset })
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.offset))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Convert a 5-field Unix cron expression to 6-field format by running
/// at second 0 of each match.
fn normalize_cron_expr(cron_expr: &str) -> String {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        cron_expr.trim().to_string()
    }
}

/// Parses `UTC`, `Z` or a fixed offset such as `+02:00` / `-0530`.
pub fn parse_timezone(timezone: &str) -> Result<FixedOffset> {
    let invalid = || {
        EngineError::validation(format!(
            "Invalid timezone '{}', expected UTC or an offset like +02:00",
            timezone
        ))
    };

    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return Err(invalid()),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_cron_expr() {
        assert_eq!(normalize_cron_expr("* * * * *"), "0 * * * * *");
        assert_eq!(normalize_cron_expr("0 * * * *"), "0 0 * * * *");
        assert_eq!(normalize_cron_expr("0 0 * * * *"), "0 0 * * * *");
    }

    #[test]
    fn test_valid_cron_expression() {
        assert!(CronSpec::parse("0 * * * *", "UTC").is_ok());
        assert!(CronSpec::parse("*/5 * * * *", "UTC").is_ok());
        assert!(CronSpec::parse("30 0 9 * * *", "UTC").is_ok());
    }

    #[test]
    fn test_invalid_cron_expression() {
        assert!(CronSpec::parse("invalid", "UTC").is_err());
        assert!(CronSpec::parse("", "UTC").is_err());
        assert!(CronSpec::parse("0 0 0 0 0 0 0 0", "UTC").is_err());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_timezone("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_timezone("-0530").unwrap().local_minus_utc(), -19800);
        assert!(parse_timezone("Europe/Paris").is_err());
        assert!(parse_timezone("+25:00").is_err());
        assert!(parse_timezone("+2").is_err());
    }

    #[test]
    fn test_next_after_utc() {
        let spec = CronSpec::parse("0 * * * *", "UTC").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap();
        assert_eq!(
            spec.next_after(after),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_next_after_with_offset() {
        // 09:00 at +02:00 is 07:00 UTC
        let spec = CronSpec::parse("0 9 * * *", "+02:00").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            spec.next_after(after),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap())
        );
    }
}
