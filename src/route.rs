//! Filename routing.
//!
//! Export files are named `<table>_<n>_<word>_<pid>.csv`. The router
//! extracts the table name and participant id; anything else in a
//! participant folder is skipped with a warning upstream.

use regex::Regex;
use std::sync::LazyLock;

/// Export filename pattern. Group 1 is the table name (hyphens allowed,
/// folded to underscores), group 4 the participant id.
static FILENAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z0-9-]+)_(\d+)_([a-z]+)_(\d+)\.csv$").expect("Invalid regex pattern")
});

/// The (table, participant) identity parsed from one filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId {
    /// Normalized table name: lowercase, hyphens folded to underscores.
    pub table: String,
    /// Participant id.
    pub pid: u32,
}

/// Parse a filename into a [`TableId`].
///
/// Returns `None` for names that do not match the export convention;
/// a folder may legitimately contain unrelated files.
pub fn route(filename: &str) -> Option<TableId> {
    let captures = FILENAME_PATTERN.captures(filename)?;

    let table = captures[1].to_ascii_lowercase().replace('-', "_");
    let pid = captures[4].parse::<u32>().ok()?;

    Some(TableId { table, pid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_basic() {
        let id = route("temp_1_export_42.csv").unwrap();
        assert_eq!(id.table, "temp");
        assert_eq!(id.pid, 42);
    }

    #[test]
    fn test_route_is_case_insensitive() {
        let id = route("Activity_2_Export_7.CSV").unwrap();
        assert_eq!(id.table, "activity");
        assert_eq!(id.pid, 7);
    }

    #[test]
    fn test_route_folds_hyphens() {
        let id = route("heart-rate_1_export_3.csv").unwrap();
        assert_eq!(id.table, "heart_rate");
        assert_eq!(id.pid, 3);
    }

    #[test]
    fn test_route_rejects_nonconforming_names() {
        assert!(route("readme.txt").is_none());
        assert!(route("temp_export_42.csv").is_none());
        assert!(route("temp_1_export_42.csv.bak").is_none());
        assert!(route("_1_export_42.csv").is_none());
    }
}
