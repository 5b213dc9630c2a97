//! Timestamp parsing for CSV file names and rows.
//!
//! Game servers have shipped several timestamp layouts over time. Formats are
//! tried in a fixed order and the first match wins; file selection depends on
//! this order staying stable.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::TimestampError;

/// Supported layouts, primary first.
pub const FORMATS: [&str; 6] = [
    "%Y.%m.%d-%H.%M.%S",
    "%Y.%m.%d-%H:%M:%S",
    "%Y-%m-%d-%H.%M.%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y.%m.%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

/// Canonical CSV file name: `YYYY.MM.DD-HH.MM.SS.csv`.
static CSV_FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}\.\d{2}\.\d{2}-\d{2}\.\d{2}\.\d{2})\.csv$").expect("valid regex")
});

/// A successfully parsed timestamp and the layout that matched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTimestamp {
    pub instant: DateTime<Utc>,
    pub format: &'static str,
}

/// Parse a timestamp string as UTC, trying [`FORMATS`] in order.
pub fn parse(raw: &str) -> Result<ParsedTimestamp, TimestampError> {
    let trimmed = raw.trim();
    FORMATS
        .iter()
        .find_map(|format| {
            NaiveDateTime::parse_from_str(trimmed, format)
                .ok()
                .map(|naive| ParsedTimestamp {
                    instant: naive.and_utc(),
                    format,
                })
        })
        .ok_or_else(|| TimestampError {
            value: raw.to_string(),
        })
}

/// Whether a file name matches the canonical CSV drop pattern.
pub fn is_csv_file_name(name: &str) -> bool {
    CSV_FILE_NAME.is_match(name)
}

/// Extract and parse the timestamp embedded in a CSV file name.
///
/// Returns `None` if the name does not match the drop pattern at all, and
/// `Some(Err(_))` if it matches but the embedded date is not a real instant
/// (for example month 13).
pub fn file_name_timestamp(name: &str) -> Option<Result<DateTime<Utc>, TimestampError>> {
    let captures = CSV_FILE_NAME.captures(name)?;
    let stamp = captures.get(1)?.as_str();
    Some(parse(stamp).map(|parsed| parsed.instant))
}
