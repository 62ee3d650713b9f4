//! Prior-report cache. A previous run's report is loaded into an index
//! keyed by directory name; a header drift invalidates the whole cache and
//! moves the stale tables aside instead of reusing them.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::columns::ResolvedColumns;
use crate::error::Result;
use crate::report::ReportPaths;

#[derive(Debug, Clone, Default)]
pub struct CachedSession {
    /// Non-empty cells of the session row, keyed by column name.
    pub row: HashMap<String, String>,
    /// Rejection rows previously written for this session.
    pub stats: Vec<HashMap<String, String>>,
}

impl CachedSession {
    fn flag(&self, column: &str) -> bool {
        self.row
            .get(column)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false)
    }

    pub fn completed(&self) -> bool {
        self.flag("Completed")
    }

    pub fn abandoned(&self) -> bool {
        self.flag("Abandoned")
    }

    pub fn total_items(&self) -> Option<u64> {
        self.row.get("Total items").and_then(|value| value.trim().parse().ok())
    }
}

/// Read-only after construction; never mutated during a run.
#[derive(Debug, Default)]
pub struct CacheIndex {
    sessions: HashMap<String, CachedSession>,
}

impl CacheIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, directory_name: &str) -> Option<&CachedSession> {
        self.sessions.get(directory_name)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub fn load_cache(paths: &ReportPaths, columns: &ResolvedColumns) -> Result<CacheIndex> {
    if !paths.sessions.exists() {
        return Ok(CacheIndex::empty());
    }
    let (headers, rows) = read_table(&paths.sessions)?;
    let found: HashSet<&str> = headers.iter().map(String::as_str).collect();
    if found != columns.session.name_set() {
        tracing::warn!(
            path = %paths.sessions.display(),
            "existing report headers do not match the resolved columns, backing it up"
        );
        backup_report(paths)?;
        return Ok(CacheIndex::empty());
    }

    let mut sessions: HashMap<String, CachedSession> = HashMap::new();
    for cells in rows {
        let row = to_row(&headers, &cells);
        if row.is_empty() {
            continue;
        }
        let Some(name) = row.get("Directory Name").cloned() else {
            continue;
        };
        sessions.insert(name, CachedSession { row, stats: Vec::new() });
    }
    if sessions.is_empty() {
        return Ok(CacheIndex { sessions });
    }

    if paths.stats.exists() {
        let (stat_headers, stat_rows) = read_table(&paths.stats)?;
        for cells in stat_rows {
            let row = to_row(&stat_headers, &cells);
            if row.is_empty() {
                continue;
            }
            let Some(session_name) = row.get("Session").cloned() else {
                continue;
            };
            // A rejection row pointing at an unknown session is dropped.
            if let Some(entry) = sessions.get_mut(&session_name) {
                entry.stats.push(row);
            }
        }
    }
    Ok(CacheIndex { sessions })
}

/// Moves any existing report tables aside to `<name>.bak`.
pub fn backup_report(paths: &ReportPaths) -> Result<()> {
    for path in [&paths.sessions, &paths.stats] {
        if path.exists() {
            let mut backup = path.as_os_str().to_owned();
            backup.push(".bak");
            tracing::warn!(from = %path.display(), "backing up report table");
            fs::rename(path, &backup)?;
        }
    }
    Ok(())
}

fn read_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.iter().map(str::to_string).collect::<Vec<_>>();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok((headers, rows))
}

fn to_row(headers: &[String], cells: &[String]) -> HashMap<String, String> {
    headers
        .iter()
        .zip(cells.iter())
        .filter(|(_, value)| !value.is_empty())
        .map(|(header, value)| (header.clone(), value.clone()))
        .collect()
}
