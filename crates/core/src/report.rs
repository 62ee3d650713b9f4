//! Report output: two CSV tables sharing one stem, written once per run
//! with a header row followed by streamed data rows.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::columns::ResolvedColumns;
use crate::error::Result;
use crate::row::{RejectionRow, SessionRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub sessions: PathBuf,
    pub stats: PathBuf,
}

impl ReportPaths {
    pub fn from_stem(stem: impl AsRef<Path>) -> Self {
        let stem = stem.as_ref();
        let mut sessions = stem.as_os_str().to_owned();
        sessions.push("_sessions.csv");
        let mut stats = stem.as_os_str().to_owned();
        stats.push("_stats.csv");
        Self { sessions: PathBuf::from(sessions), stats: PathBuf::from(stats) }
    }
}

pub struct ReportWriter {
    sessions: csv::Writer<File>,
    stats: csv::Writer<File>,
    columns: ResolvedColumns,
}

impl ReportWriter {
    pub fn create(paths: &ReportPaths, columns: &ResolvedColumns) -> Result<Self> {
        if let Some(parent) = paths.sessions.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut sessions = csv::Writer::from_path(&paths.sessions)?;
        sessions.write_record(columns.session.names())?;
        let mut stats = csv::Writer::from_path(&paths.stats)?;
        stats.write_record(columns.stat.names())?;
        Ok(Self { sessions, stats, columns: columns.clone() })
    }

    pub fn append_session(&mut self, row: &SessionRow) -> Result<()> {
        let record: Vec<String> = self
            .columns
            .session
            .names()
            .iter()
            .map(|column| row.get(column).map(value_to_cell).unwrap_or_default())
            .collect();
        self.sessions.write_record(&record)?;
        Ok(())
    }

    pub fn append_rejection(&mut self, row: &RejectionRow) -> Result<()> {
        let record: Vec<String> = self
            .columns
            .stat
            .names()
            .iter()
            .map(|column| row.cell(column).map(|value| value_to_cell(&value)).unwrap_or_default())
            .collect();
        self.stats.write_record(&record)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.sessions.flush()?;
        self.stats.flush()?;
        Ok(())
    }
}

/// Renders a cell, stripping control characters from string values.
pub fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => sanitize(text),
        other => sanitize(&other.to_string()),
    }
}

/// Drops everything below the printable range, newlines and tabs included.
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| *c as u32 >= 0x20).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths_share_the_stem() {
        let paths = ReportPaths::from_stem("/tmp/demo_report");
        assert_eq!(paths.sessions, PathBuf::from("/tmp/demo_report_sessions.csv"));
        assert_eq!(paths.stats, PathBuf::from("/tmp/demo_report_stats.csv"));
    }

    #[test]
    fn sanitize_strips_control_characters() {
        assert_eq!(sanitize("ab\x00c\nd\te"), "abcde");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn cells_render_by_type() {
        assert_eq!(value_to_cell(&Value::Null), "");
        assert_eq!(value_to_cell(&json!(true)), "true");
        assert_eq!(value_to_cell(&json!(42)), "42");
        assert_eq!(value_to_cell(&json!(1.5)), "1.5");
        assert_eq!(value_to_cell(&json!("x\ny")), "xy");
    }
}
