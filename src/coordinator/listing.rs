//! Candidate file discovery.
//!
//! Lists the CSV root (and its per-map subdirectories when no single map is
//! configured), keeps names that match the drop pattern, and orders what is
//! still unprocessed oldest first.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::checkpoint::SourceWatermark;
use crate::error::RemoteError;
use crate::parser::timestamp;
use crate::remote::{RemoteEntry, RemoteSession};

/// A CSV file that may need ingesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Name relative to the CSV root, e.g. `world_0/2025.05.04-00.00.00.csv`.
    /// This is the key recorded in the watermark.
    pub name: String,
    /// Full remote path.
    pub path: String,
    pub map: Option<String>,
    /// Instant embedded in the file name.
    pub timestamp: DateTime<Utc>,
}

/// Result of scanning a source.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<CandidateFile>,
    /// CSV-looking names whose embedded date could not be parsed.
    pub invalid_names: usize,
    /// Map subdirectories that could not be listed.
    pub unreadable_dirs: usize,
}

/// Where and how to look for files.
#[derive(Debug, Clone, Copy)]
pub struct ListingScope<'a> {
    pub server_id: &'a str,
    pub csv_dir: &'a str,
    /// Set when the source points at one map directory directly.
    pub map: Option<&'a str>,
    /// Also descend into subdirectories of `csv_dir`.
    pub scan_maps: bool,
}

fn is_map_dir(entry: &RemoteEntry) -> bool {
    entry.is_dir && !entry.name.starts_with('.')
}

fn collect_files(
    scope: &ListingScope<'_>,
    entries: Vec<RemoteEntry>,
    prefix: Option<&str>,
    map: Option<&str>,
    discovery: &mut Discovery,
) {
    for entry in entries.into_iter().filter(|e| !e.is_dir) {
        let Some(parsed) = timestamp::file_name_timestamp(&entry.name) else {
            if entry.name.to_ascii_lowercase().ends_with(".csv") {
                warn!(
                    server_id = scope.server_id,
                    file = %entry.path,
                    "Skipping CSV file without a timestamped name"
                );
                discovery.invalid_names += 1;
            }
            continue;
        };
        match parsed {
            Ok(ts) => discovery.files.push(CandidateFile {
                name: match prefix {
                    Some(prefix) => format!("{prefix}/{}", entry.name),
                    None => entry.name.clone(),
                },
                path: entry.path,
                map: map.map(str::to_string),
                timestamp: ts,
            }),
            Err(e) => {
                warn!(
                    server_id = scope.server_id,
                    file = %entry.path,
                    error = %e,
                    "Skipping CSV file with an invalid name timestamp"
                );
                discovery.invalid_names += 1;
            }
        }
    }
}

/// List every timestamped CSV file visible to this source.
///
/// Failing to list the CSV root is an error; failing to list one map
/// directory is logged and that directory skipped.
pub async fn discover(
    session: &mut dyn RemoteSession,
    scope: ListingScope<'_>,
) -> Result<Discovery, RemoteError> {
    let root = session.list_dir(scope.csv_dir).await?;
    let mut discovery = Discovery::default();

    let map_dirs: Vec<RemoteEntry> = if scope.scan_maps {
        root.iter().filter(|e| is_map_dir(e)).cloned().collect()
    } else {
        Vec::new()
    };
    collect_files(&scope, root, None, scope.map, &mut discovery);

    for dir in map_dirs {
        match session.list_dir(&dir.path).await {
            Ok(entries) => {
                collect_files(&scope, entries, Some(&dir.name), Some(&dir.name), &mut discovery)
            }
            Err(e) => {
                warn!(
                    server_id = scope.server_id,
                    dir = %dir.path,
                    error = %e,
                    "Failed to list map directory, skipping"
                );
                discovery.unreadable_dirs += 1;
            }
        }
    }

    debug!(
        server_id = scope.server_id,
        files = discovery.files.len(),
        "Listed CSV files"
    );
    Ok(discovery)
}

/// Files at or after `cutoff` that the watermark has not seen, ordered by
/// (timestamp, name).
pub fn select_candidates(
    files: Vec<CandidateFile>,
    watermark: &SourceWatermark,
    cutoff: DateTime<Utc>,
) -> Vec<CandidateFile> {
    let mut candidates: Vec<CandidateFile> = files
        .into_iter()
        .filter(|f| f.timestamp >= cutoff && !watermark.is_processed(&f.name))
        .collect();
    candidates.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
    candidates
}
