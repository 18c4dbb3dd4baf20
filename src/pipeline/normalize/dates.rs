use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use crate::constants::DEFAULT_DATETIME_FORMATS;

/// Years outside this range mean a format matched the wrong way round
/// (`%Y` happily reads "25" as year 25).
const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2200;

/// Parse a posting date trying `source_formats` first, then `fallback_formats`,
/// then RFC 3339 and the common datetime layouts.
pub fn parse_observed_date(
    raw: &str,
    source_formats: &[String],
    fallback_formats: &[String],
) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let formats = source_formats
        .iter()
        .chain(fallback_formats.iter())
        .map(|f| f.as_str());

    for format in formats {
        if let Some(date) = parse_with(value, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return plausible(dt.date_naive());
    }

    DEFAULT_DATETIME_FORMATS
        .iter()
        .find_map(|format| parse_with(value, format))
}

fn parse_with(value: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, format)
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, format)
                .ok()
                .map(|dt| dt.date())
        })
        .and_then(plausible)
}

fn plausible(date: NaiveDate) -> Option<NaiveDate> {
    PLAUSIBLE_YEARS.contains(&date.year()).then_some(date)
}
