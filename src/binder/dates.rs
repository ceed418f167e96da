//! Ordered date-pattern parsing for query parameters.
//!
//! The accepted patterns, tried in order (first parse wins):
//!
//! 1. ISO date-time with numeric offset (`2024-03-01T10:15:30.250+02:00`)
//! 2. ISO date-time with millis and literal `Z`
//! 3. ISO date-time without millis, literal `Z`
//! 4. ISO date-time without a timezone (assumed UTC)
//! 5. Date only (`2024-03-01`)
//! 6. Year-month (`2024-03`)
//! 7. Year only (`2024`)

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse a wire value against the ordered pattern list.
///
/// `None` means no pattern accepted the input; the binder turns that into
/// a 400 naming the parameter.
#[must_use]
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    // Patterns 1-3: offset and Z forms are all valid RFC 3339.
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Pattern 4: naive date-time, assumed UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    // Pattern 5: date only.
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    // Patterns 6-7: year-month and bare year.
    if let Some(date) = parse_year_month(raw).or_else(|| parse_year(raw)) {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

fn parse_year_month(raw: &str) -> Option<NaiveDate> {
    let (year, month) = raw.split_once('-')?;
    if year.is_empty() || month.is_empty() {
        return None;
    }
    if !all_digits(year) || !all_digits(month) {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

fn parse_year(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() || !all_digits(raw) {
        return None;
    }
    NaiveDate::from_ymd_opt(raw.parse().ok()?, 1, 1)
}

fn all_digits(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit())
}
