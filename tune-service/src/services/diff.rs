//! Config diff engine.
//!
//! Compares two textual configuration dumps (line-oriented `set key = value`
//! assignment lists) and produces a structured change set. Pure functions,
//! no I/O; safe to call repeatedly and concurrently.

use serde::Serialize;
use std::collections::BTreeMap;

pub const WARN_MISSING_CLI_DUMP: &str = "missing_cli_dump";
pub const WARN_MISSING_CLI_COMMANDS: &str = "missing_cli_commands";
pub const WARN_NO_CHANGES: &str = "no_changes_detected";

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Changed,
    Added,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ConfigDiffEntry {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    pub after: String,
    pub status: DiffStatus,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub changed: usize,
    pub added: usize,
    pub unchanged: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct ConfigDiff {
    pub entries: Vec<ConfigDiffEntry>,
    pub summary: DiffSummary,
    pub warnings: Vec<&'static str>,
}

/// Parse a configuration dump into a key -> value map.
///
/// A line is significant only if, after trimming, it reads `set <key> = <value>`
/// with `<key>` an identifier of letters/digits/underscore. Everything else
/// (comments, blank lines, other CLI commands) is ignored. The dump is treated
/// as a replayed assignment log, so the last occurrence of a key wins.
pub fn parse_assignments(text: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("set") else {
            continue;
        };
        // Require whitespace after the keyword so e.g. `setpoint_x = 1` is ignored.
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let Some((key_part, value_part)) = rest.split_once('=') else {
            continue;
        };
        let key = key_part.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        map.insert(key.to_string(), value_part.trim().to_string());
    }

    map
}

/// Diff two configuration texts.
///
/// Every key in `updated` yields an `added` entry (absent from `original`),
/// a `changed` entry (present with a different value), or is counted as
/// unchanged and excluded from the entry list. Entries come back sorted by
/// key for deterministic rendering. Warning tags are independent and may
/// co-occur.
pub fn diff(original: &str, updated: &str) -> ConfigDiff {
    let mut warnings = Vec::new();
    if original.trim().is_empty() {
        warnings.push(WARN_MISSING_CLI_DUMP);
    }
    if updated.trim().is_empty() {
        warnings.push(WARN_MISSING_CLI_COMMANDS);
    }

    let before = parse_assignments(original);
    let after = parse_assignments(updated);

    let mut entries = Vec::new();
    let mut summary = DiffSummary::default();

    // BTreeMap iteration keeps entries sorted lexicographically by key.
    for (key, value) in &after {
        match before.get(key) {
            None => {
                summary.added += 1;
                entries.push(ConfigDiffEntry {
                    key: key.clone(),
                    before: None,
                    after: value.clone(),
                    status: DiffStatus::Added,
                });
            }
            Some(prev) if prev != value => {
                summary.changed += 1;
                entries.push(ConfigDiffEntry {
                    key: key.clone(),
                    before: Some(prev.clone()),
                    after: value.clone(),
                    status: DiffStatus::Changed,
                });
            }
            Some(_) => summary.unchanged += 1,
        }
    }

    if entries.is_empty() {
        warnings.push(WARN_NO_CHANGES);
    }

    ConfigDiff {
        entries,
        summary,
        warnings,
    }
}
