//! CSV kill-log parsing.
//!
//! Turns the raw bytes of one CSV drop into canonical events. Individual bad
//! rows are skipped and counted; parsing never fails as a whole.

pub mod delimiter;
pub mod timestamp;

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, Trim};
use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::event::normalize::{NormalizeContext, RawRecord, normalize};
use crate::event::{CanonicalEvent, UNKNOWN};

/// Positional layout of a kill-log row.
pub const COLUMNS: [&str; 9] = [
    "timestamp",
    "killer_name",
    "killer_id",
    "victim_name",
    "victim_id",
    "weapon",
    "distance",
    "killer_platform",
    "victim_platform",
];

/// Rows shorter than this cannot describe a kill.
pub const MIN_FIELDS: usize = 6;

const DISTANCE_COLUMN: usize = 6;

/// Where the bytes being parsed came from.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub server_id: &'a str,
    pub file: &'a str,
    pub map: Option<&'a str>,
    /// Substituted for unparseable row timestamps.
    pub now: DateTime<Utc>,
}

/// Per-file row accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub rows: usize,
    pub accepted: usize,
    pub skipped_short: usize,
    pub skipped_missing_ids: usize,
    pub skipped_invalid: usize,
    pub skipped_malformed: usize,
    pub duplicates: usize,
    pub degraded: usize,
}

impl ParseStats {
    pub fn skipped(&self) -> usize {
        self.skipped_short
            + self.skipped_missing_ids
            + self.skipped_invalid
            + self.skipped_malformed
            + self.duplicates
    }
}

/// Parsed events of one file, in row order.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub events: Vec<CanonicalEvent>,
    pub stats: ParseStats,
    pub delimiter: u8,
}

/// Map a positional row onto canonical field names.
fn positional_record(fields: &csv::StringRecord) -> RawRecord {
    COLUMNS
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = match fields.get(idx) {
                Some(value) => value.to_string(),
                None if idx == DISTANCE_COLUMN => "0".to_string(),
                None => UNKNOWN.to_string(),
            };
            (column.to_string(), value)
        })
        .collect()
}

/// Parse raw CSV bytes.
///
/// Undecodable byte sequences are replaced rather than rejected. When
/// `delimiter` is `None` it is detected from the text.
pub fn parse(bytes: &[u8], delimiter: Option<u8>, ctx: &ParseContext<'_>) -> ParsedFile {
    let text = String::from_utf8_lossy(bytes);
    let delimiter = delimiter.unwrap_or_else(|| delimiter::detect(&text));

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let normalize_ctx = NormalizeContext {
        server_id: ctx.server_id,
        map: ctx.map,
        now: ctx.now,
    };

    let mut stats = ParseStats::default();
    let mut seen = IndexSet::new();
    let mut events = Vec::new();

    for (row, result) in reader.records().enumerate() {
        stats.rows += 1;
        let fields = match result {
            Ok(fields) => fields,
            Err(e) => {
                stats.skipped_malformed += 1;
                warn!(server_id = ctx.server_id, file = ctx.file, row, error = %e, "Malformed CSV row");
                continue;
            }
        };

        if fields.iter().all(str::is_empty) {
            stats.skipped_short += 1;
            continue;
        }

        if fields.len() < MIN_FIELDS {
            stats.skipped_short += 1;
            debug!(
                server_id = ctx.server_id,
                file = ctx.file,
                row,
                fields = fields.len(),
                value = ?fields.iter().collect::<Vec<_>>(),
                "Skipping row with too few fields"
            );
            continue;
        }

        // A kill needs a victim id. A missing killer id is allowed: that is how
        // environmental deaths are written.
        if fields.get(4).is_none_or(str::is_empty) {
            stats.skipped_missing_ids += 1;
            debug!(
                server_id = ctx.server_id,
                file = ctx.file,
                row,
                "Skipping row without victim id"
            );
            continue;
        }

        let event = normalize(&positional_record(&fields), &normalize_ctx);

        if !event.is_publishable() {
            stats.skipped_invalid += 1;
            debug!(
                server_id = ctx.server_id,
                file = ctx.file,
                row,
                "Skipping row without victim name"
            );
            continue;
        }

        if event.degraded {
            stats.degraded += 1;
            warn!(
                server_id = ctx.server_id,
                file = ctx.file,
                row,
                value = fields.get(0).unwrap_or_default(),
                "Unparseable row timestamp, using processing time"
            );
        }

        if !seen.insert(event.id.clone()) {
            stats.duplicates += 1;
            debug!(server_id = ctx.server_id, file = ctx.file, row, id = %event.id, "Duplicate event in file");
            continue;
        }

        stats.accepted += 1;
        events.push(event);
    }

    ParsedFile {
        events,
        stats,
        delimiter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventCategory;
    use chrono::TimeZone;

    fn ctx() -> ParseContext<'static> {
        ParseContext {
            server_id: "7020",
            file: "2025.05.04-00.00.00.csv",
            map: None,
            now: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_suicide_row() {
        let parsed = parse(
            b"2025.05.04-00.09.16;Njshh;1;Njshh;1;suicide_by_relocation;0;PC;PC\n",
            None,
            &ctx(),
        );

        assert_eq!(parsed.events.len(), 1);
        let event = &parsed.events[0];
        assert_eq!(event.category, EventCategory::Suicide);
        assert_eq!(event.killer_name, "Njshh");
        assert_eq!(event.victim_name, "Njshh");
        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2025, 5, 4, 0, 9, 16).unwrap()
        );
        assert_eq!(event.server_id, "7020");
    }

    #[test]
    fn test_kill_row() {
        let parsed = parse(
            b"2025.05.04-00.10.00;OGz DelBoy;55;TedTornado;77;land_vehicle;120;PC;PC\n",
            None,
            &ctx(),
        );

        assert_eq!(parsed.events.len(), 1);
        let event = &parsed.events[0];
        assert_eq!(event.category, EventCategory::Kill);
        assert_eq!(event.distance, 120.0);
        assert_eq!(event.killer_name, "OGz DelBoy");
        assert_eq!(event.id, "2025.05.04-00.10.00:OGz DelBoy:TedTornado:land_vehicle");
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let text = "2025.05.04-00.10.00;A;1;B;2\n\
                    2025.05.04-00.11.00;A;1;B;2;AK-74\n\
                    only;three;fields\n";
        let parsed = parse(text.as_bytes(), None, &ctx());

        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.stats.skipped_short, 2);
        assert_eq!(parsed.stats.rows, 3);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let parsed = parse(b"2025.05.04-00.11.00;A;1;B;2;AK-74\n", None, &ctx());
        let event = &parsed.events[0];
        assert_eq!(event.distance, 0.0);
        assert_eq!(event.killer_platform, UNKNOWN);
        assert_eq!(event.victim_platform, UNKNOWN);
    }

    #[test]
    fn test_empty_ids() {
        let text = "2025.05.04-00.10.00;;;Bob;;AK-74;0;PC;PC\n\
                    2025.05.04-00.11.00;;;Bob;9;Fall;0;PC;PC\n";
        let parsed = parse(text.as_bytes(), None, &ctx());

        assert_eq!(parsed.stats.skipped_missing_ids, 1);
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].category, EventCategory::Suicide);
    }

    #[test]
    fn test_degraded_timestamp_is_kept() {
        let parsed = parse(b"not-a-date;A;1;B;2;AK-74;5;PC;PC\n", None, &ctx());

        assert_eq!(parsed.events.len(), 1);
        assert!(parsed.events[0].degraded);
        assert_eq!(parsed.events[0].timestamp, ctx().now);
        assert_eq!(parsed.stats.degraded, 1);
    }

    #[test]
    fn test_quoted_delimiters_do_not_split() {
        let parsed = parse(
            b"2025.05.04-00.10.00;\"Smith; John\";1;Bob;2;AK-74;3;PC;PC\n",
            Some(b';'),
            &ctx(),
        );
        assert_eq!(parsed.events[0].killer_name, "Smith; John");
    }

    #[test]
    fn test_comma_delimited_file() {
        let text = "2025.05.04-00.10.00,A,1,B,2,AK-74,3,PC,PC\n";
        let parsed = parse(text.as_bytes(), None, &ctx());
        assert_eq!(parsed.delimiter, b',');
        assert_eq!(parsed.events.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut bytes = b"2025.05.04-00.10.00;A".to_vec();
        bytes.push(0xff);
        bytes.extend_from_slice(b";1;B;2;AK-74;3;PC;PC\n");
        let parsed = parse(&bytes, None, &ctx());
        assert_eq!(parsed.events.len(), 1);
        assert!(parsed.events[0].killer_name.starts_with('A'));
    }

    #[test]
    fn test_duplicate_rows_in_file_are_published_once() {
        let row = "2025.05.04-00.10.00;A;1;B;2;AK-74;3;PC;PC\n";
        let parsed = parse(format!("{row}{row}").as_bytes(), None, &ctx());
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.stats.duplicates, 1);
    }

    #[test]
    fn test_map_context_is_applied() {
        let ctx = ParseContext {
            map: Some("world_1"),
            ..ctx()
        };
        let parsed = parse(b"2025.05.04-00.10.00;A;1;B;2;AK-74\n", None, &ctx);
        assert_eq!(parsed.events[0].map.as_deref(), Some("world_1"));
    }
}
