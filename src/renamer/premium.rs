//! Time-limited premium plans.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("invalid duration '{0}' (use e.g. 30m, 6h, 7d, 2w, 1mh, 1y)")]
    InvalidDuration(String),
    #[error("duration must be greater than zero")]
    Zero,
}

/// Parse a plan length such as `30d`, `6h` or `2mh` (months).
pub fn parse_plan_duration(input: &str) -> Result<Duration, PlanError> {
    let input = input.trim();
    let unit_start = input.find(|c: char| !c.is_ascii_digit()).unwrap_or(input.len());
    if unit_start == 0 {
        return Err(PlanError::InvalidDuration(input.to_string()));
    }

    let num: i64 = input[..unit_start]
        .parse()
        .map_err(|_| PlanError::InvalidDuration(input.to_string()))?;
    if num == 0 {
        return Err(PlanError::Zero);
    }

    let duration = match input[unit_start..].to_lowercase().as_str() {
        "m" | "min" | "mins" => Duration::try_minutes(num),
        "h" | "hr" | "hrs" => Duration::try_hours(num),
        "d" | "day" | "days" => Duration::try_days(num),
        "w" | "week" | "weeks" => Duration::try_weeks(num),
        "mh" | "mo" | "month" | "months" => num.checked_mul(30).and_then(Duration::try_days),
        "y" | "year" | "years" => num.checked_mul(365).and_then(Duration::try_days),
        _ => None,
    };
    duration.ok_or_else(|| PlanError::InvalidDuration(input.to_string()))
}

/// Expiry of a plan granted at `now`.
pub fn expiry_from(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn format_expiry(expiry: DateTime<Utc>) -> String {
    expiry.format("%d %b %Y, %H:%M:%S UTC").to_string()
}

/// Remaining plan time, e.g. `3 days, 4 hours, 12 minutes`.
pub fn format_remaining(remaining: Duration) -> String {
    let remaining = remaining.max(Duration::zero());
    let days = remaining.num_days();
    let hours = remaining.num_hours() % 24;
    let minutes = remaining.num_minutes() % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days} days, "));
    }
    if hours > 0 || days > 0 {
        out.push_str(&format!("{hours} hours, "));
    }
    out.push_str(&format!("{minutes} minutes"));
    out
}

/// Who a premium command is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(i64),
    Username(String),
}

impl Target {
    fn parse(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(id) if id > 0 => Target::Id(id),
            _ => Target::Username(s.trim_start_matches('@').to_string()),
        }
    }
}

pub const ADD_USAGE: &str = "<b>Usage:</b> <code>/addpremium [reply/userid/username] [duration]</code>\n\n\
<b>Examples:</b>\n\
- <code>/addpremium 123456789 30d</code> (30 days)\n\
- <code>/addpremium @username 2mh</code> (2 months)\n\
- reply to a message with <code>/addpremium 6h</code> (6 hours)";

pub const REMOVE_USAGE: &str =
    "<b>Usage:</b> <code>/rmpremium [userid/username]</code> or reply to a user's message";

/// Arguments of `/addpremium`: `<target> <duration>`, or `<duration>` when
/// replying to the target's message.
pub fn parse_add_args(args: &str, reply_user: Option<i64>) -> Option<(Target, String)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match (parts.as_slice(), reply_user) {
        ([duration], Some(user)) => Some((Target::Id(user), duration.to_string())),
        ([target, duration], _) => Some((Target::parse(target), duration.to_string())),
        _ => None,
    }
}

/// Arguments of `/rmpremium`: `<target>`, or nothing when replying.
pub fn parse_remove_args(args: &str, reply_user: Option<i64>) -> Option<Target> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match (parts.as_slice(), reply_user) {
        (_, Some(user)) => Some(Target::Id(user)),
        ([target], None) => Some(Target::parse(target)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_plan_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_plan_duration("6h").unwrap(), Duration::hours(6));
        assert_eq!(parse_plan_duration("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_plan_duration("2w").unwrap(), Duration::weeks(2));
        assert_eq!(parse_plan_duration("2mh").unwrap(), Duration::days(60));
        assert_eq!(parse_plan_duration("1Y").unwrap(), Duration::days(365));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(parse_plan_duration("d"), Err(PlanError::InvalidDuration(_))));
        assert!(matches!(parse_plan_duration("10x"), Err(PlanError::InvalidDuration(_))));
        assert!(matches!(parse_plan_duration("10"), Err(PlanError::InvalidDuration(_))));
        assert_eq!(parse_plan_duration("0d"), Err(PlanError::Zero));
    }

    #[test]
    fn test_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let expiry = expiry_from(now, Duration::days(30));
        assert_eq!(format_expiry(expiry), "31 Jan 2026, 12:00:00 UTC");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::minutes(42)), "42 minutes");
        assert_eq!(format_remaining(Duration::minutes(61)), "1 hours, 1 minutes");
        assert_eq!(
            format_remaining(Duration::days(3) + Duration::minutes(5)),
            "3 days, 0 hours, 5 minutes"
        );
        assert_eq!(format_remaining(Duration::minutes(-5)), "0 minutes");
    }

    #[test]
    fn test_add_args() {
        assert_eq!(
            parse_add_args("123 30d", None),
            Some((Target::Id(123), "30d".to_string()))
        );
        assert_eq!(
            parse_add_args("@alice 2mh", None),
            Some((Target::Username("alice".into()), "2mh".to_string()))
        );
        assert_eq!(parse_add_args("6h", Some(99)), Some((Target::Id(99), "6h".to_string())));
        assert_eq!(parse_add_args("6h", None), None);
        assert_eq!(parse_add_args("", Some(99)), None);
    }

    #[test]
    fn test_remove_args() {
        assert_eq!(parse_remove_args("", Some(5)), Some(Target::Id(5)));
        assert_eq!(parse_remove_args("bob", None), Some(Target::Username("bob".into())));
        assert_eq!(parse_remove_args("", None), None);
        assert_eq!(parse_remove_args("a b", None), None);
    }
}
