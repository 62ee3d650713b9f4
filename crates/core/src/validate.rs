//! Per-file stat validation and aggregation for one session.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use jsonschema::Validator;
use serde_json::Value;

use crate::columns::{ColumnSet, STAT_BASE};
use crate::error::{ReportError, Result};
use crate::row::RejectionRow;
use crate::store::{CollectStore, Session};

/// Prompt types whose files count as recorded and get their stats checked.
pub const ELIGIBLE_PROMPT_TYPES: &[&str] = &["recording", "video", "image"];

#[derive(Debug, Clone, Default)]
pub struct FileTally {
    pub total: u64,
    pub skipped: u64,
    pub recorded: u64,
    pub rejected: u64,
    pub missing_stats: u64,
    /// Raw per-column stat values, only filled under median aggregation.
    pub aggregates: HashMap<String, Vec<Value>>,
}

pub fn compile_schema(schema: &Value) -> Result<Validator> {
    jsonschema::draft7::new(schema).map_err(|e| ReportError::InvalidSchema(e.to_string()))
}

pub fn validation_reasons(validator: &Validator, stat: &Value) -> Vec<String> {
    validator.iter_errors(stat).map(|error| error.to_string()).collect()
}

/// One pass over a session's files: category counts, schema validation,
/// rejection rows, and (when requested) aggregate raw values.
pub fn tally_session_files(
    store: &dyn CollectStore,
    session: &Session,
    validator: Option<&Validator>,
    stat_columns: &ColumnSet,
    exclude_corpus_codes: &HashSet<String>,
    median_stats: bool,
) -> (FileTally, Vec<RejectionRow>) {
    let mut tally = FileTally::default();
    let mut rejections = Vec::new();
    for file in store.files_for(session.id) {
        tally.total += 1;
        if file.skipped {
            tally.skipped += 1;
        }
        let eligible =
            !file.skipped && ELIGIBLE_PROMPT_TYPES.contains(&file.prompt_type.as_str());
        if !eligible {
            continue;
        }
        tally.recorded += 1;

        let Some(validator) = validator else { continue };
        let excluded = file
            .corpus_code
            .as_deref()
            .map(|code| exclude_corpus_codes.contains(code))
            .unwrap_or(false);
        if excluded {
            continue;
        }
        let Some(stat) = store.latest_stat(&file.path) else {
            tally.missing_stats += 1;
            continue;
        };

        let reasons = validation_reasons(validator, &stat.json);
        if reasons.is_empty() && !median_stats {
            continue;
        }
        let mut rejection = (!reasons.is_empty()).then(|| RejectionRow {
            session: session.name.clone(),
            file: basename(&file.path).to_string(),
            reason: reasons.join(","),
            values: HashMap::new(),
        });
        for column in stat_columns.names().iter().skip(STAT_BASE.len()) {
            let Some(value) = stat_value(&stat.json, &file.prompt_type, column) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if let Some(rejection) = rejection.as_mut() {
                rejection.values.insert(column.clone(), value.clone());
            }
            if median_stats {
                tally.aggregates.entry(column.clone()).or_default().push(value.clone());
            }
        }
        if let Some(rejection) = rejection {
            tally.rejected += 1;
            rejections.push(rejection);
        }
    }
    (tally, rejections)
}

/// Reads the raw value one stat column refers to, given the file's prompt
/// type. Bare columns only apply to recordings; `"<category>/<field>"`
/// columns read the matching nested object, with `audio/...` also read from
/// video stats since video files carry an embedded audio track.
fn stat_value<'a>(stat: &'a Value, prompt_type: &str, column: &str) -> Option<&'a Value> {
    match column.split_once('/') {
        None => {
            if prompt_type == "recording" {
                stat.get(column)
            } else {
                None
            }
        }
        Some((category, field)) => {
            if category == prompt_type || (category == "audio" && prompt_type == "video") {
                stat.get(category).and_then(|inner| inner.get(field))
            } else {
                None
            }
        }
    }
}

/// Median over the numeric values of an accumulator. The `"NaN"` and
/// `"Infinity"` sentinels are skipped silently, anything else non-numeric is
/// reported; no numeric values at all yields zero.
pub fn median_of(column: &str, values: &[Value]) -> f64 {
    let mut numeric = Vec::new();
    for value in values {
        match value {
            Value::Number(number) => {
                if let Some(as_float) = number.as_f64() {
                    numeric.push(as_float);
                }
            }
            Value::String(text) if text == "NaN" || text == "Infinity" => {}
            other => {
                tracing::warn!(column, value = %other, "unrecognised stat value, ignoring")
            }
        }
    }
    if numeric.is_empty() {
        return 0.0;
    }
    numeric.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = numeric.len() / 2;
    if numeric.len() % 2 == 1 {
        numeric[mid]
    } else {
        (numeric[mid - 1] + numeric[mid]) / 2.0
    }
}

fn basename(path: &str) -> &str {
    Path::new(path).file_name().and_then(|name| name.to_str()).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::resolve_columns;
    use crate::config::ReportOptions;
    use crate::store::{
        FileRecord, MemoryStore, Project, ProjectSnapshot, SessionSnapshot, StatEntry, StatRecord,
    };
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "snr": {"type": "number", "minimum": 10},
                "video": {"properties": {"duration": {}}},
                "audio": {"properties": {"samplerate": {}}}
            },
            "required": ["snr"]
        })
    }

    fn file(path: &str, prompt_type: &str, skipped: bool) -> FileRecord {
        FileRecord {
            path: path.into(),
            prompt_type: prompt_type.into(),
            corpus_code: Some("1word1".into()),
            skipped,
            created: "2024-01-01".into(),
            attributes: Value::Null,
        }
    }

    fn store_with(files: Vec<FileRecord>, stats: Vec<StatEntry>) -> (MemoryStore, Session) {
        let session = Session {
            id: 1,
            name: "sess_0001".into(),
            pin: "pin".into(),
            email: None,
            completed: false,
            abandoned: false,
            created: String::new(),
            duration: None,
            script_number: None,
            device_info: None,
            prompts: vec![],
        };
        let snapshot = ProjectSnapshot {
            project: Project {
                number: 1,
                name: "p".into(),
                description: String::new(),
                lang_code: String::new(),
            },
            sessions: vec![SessionSnapshot { session: session.clone(), files }],
            stats,
            users: vec![],
            user_attributes: vec![],
            input_prompts: vec![],
        };
        (MemoryStore::from_snapshot(snapshot), session)
    }

    #[test]
    fn counts_cover_all_categories_in_one_pass() {
        let files = vec![
            file("/d/a.wav", "recording", false),
            file("/d/b.wav", "recording", true),
            file("/d/c.json", "input", false),
            file("/d/d.mp4", "video", false),
        ];
        let (store, session) = store_with(files, vec![]);
        let columns = resolve_columns(&ReportOptions::default(), &[]).unwrap();
        let (tally, rejections) = tally_session_files(
            &store,
            &session,
            None,
            &columns.stat,
            &HashSet::new(),
            false,
        );
        assert_eq!(tally.total, 4);
        assert_eq!(tally.skipped, 1);
        assert_eq!(tally.recorded, 2);
        assert_eq!(tally.rejected, 0);
        assert!(rejections.is_empty());
    }

    #[test]
    fn missing_stats_counted_without_rejection_rows() {
        let (store, session) = store_with(vec![file("/d/a.wav", "recording", false)], vec![]);
        let validator = compile_schema(&schema()).unwrap();
        let columns = resolve_columns(
            &ReportOptions { schema: Some(schema()), ..Default::default() },
            &[],
        )
        .unwrap();
        let (tally, rejections) = tally_session_files(
            &store,
            &session,
            Some(&validator),
            &columns.stat,
            &HashSet::new(),
            false,
        );
        assert_eq!(tally.missing_stats, 1);
        assert!(rejections.is_empty());
    }

    #[test]
    fn failing_stats_emit_rejection_rows_with_raw_values() {
        let stats = vec![StatEntry {
            path: "/d/a.wav".into(),
            stat: StatRecord { created: "2024-01-02".into(), json: json!({"snr": 4}) },
        }];
        let (store, session) = store_with(vec![file("/d/a.wav", "recording", false)], stats);
        let validator = compile_schema(&schema()).unwrap();
        let columns = resolve_columns(
            &ReportOptions { schema: Some(schema()), ..Default::default() },
            &[],
        )
        .unwrap();
        let (tally, rejections) = tally_session_files(
            &store,
            &session,
            Some(&validator),
            &columns.stat,
            &HashSet::new(),
            false,
        );
        assert_eq!(tally.rejected, 1);
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].session, "sess_0001");
        assert_eq!(rejections[0].file, "a.wav");
        assert!(!rejections[0].reason.is_empty());
        assert_eq!(rejections[0].values.get("snr"), Some(&json!(4)));
    }

    #[test]
    fn excluded_corpus_codes_skip_validation() {
        let stats = vec![StatEntry {
            path: "/d/a.wav".into(),
            stat: StatRecord { created: "2024-01-02".into(), json: json!({"snr": 4}) },
        }];
        let (store, session) = store_with(vec![file("/d/a.wav", "recording", false)], stats);
        let validator = compile_schema(&schema()).unwrap();
        let columns = resolve_columns(
            &ReportOptions { schema: Some(schema()), ..Default::default() },
            &[],
        )
        .unwrap();
        let excluded: HashSet<String> = ["1word1".to_string()].into();
        let (tally, rejections) = tally_session_files(
            &store,
            &session,
            Some(&validator),
            &columns.stat,
            &excluded,
            false,
        );
        assert_eq!(tally.rejected, 0);
        assert_eq!(tally.missing_stats, 0);
        assert!(rejections.is_empty());
    }

    #[test]
    fn aggregates_fill_for_passing_files_under_median() {
        let stats = vec![
            StatEntry {
                path: "/d/a.wav".into(),
                stat: StatRecord { created: "1".into(), json: json!({"snr": 15}) },
            },
            StatEntry {
                path: "/d/v.mp4".into(),
                stat: StatRecord {
                    created: "1".into(),
                    json: json!({"snr": 20, "video": {"duration": 9000}, "audio": {"samplerate": 44100}}),
                },
            },
        ];
        let files =
            vec![file("/d/a.wav", "recording", false), file("/d/v.mp4", "video", false)];
        let (store, session) = store_with(files, stats);
        let validator = compile_schema(&schema()).unwrap();
        let columns = resolve_columns(
            &ReportOptions { schema: Some(schema()), median_stats: true, ..Default::default() },
            &[],
        )
        .unwrap();
        let (tally, rejections) = tally_session_files(
            &store,
            &session,
            Some(&validator),
            &columns.stat,
            &HashSet::new(),
            true,
        );
        assert!(rejections.is_empty());
        // Bare column applies to the recording only.
        assert_eq!(tally.aggregates.get("snr"), Some(&vec![json!(15)]));
        // Nested video column, and audio read through the video stat.
        assert_eq!(tally.aggregates.get("video/duration"), Some(&vec![json!(9000)]));
        assert_eq!(tally.aggregates.get("audio/samplerate"), Some(&vec![json!(44100)]));
    }

    #[test]
    fn median_filters_sentinels_and_defaults_to_zero() {
        let values = vec![json!(1), json!(2), json!(3), json!("NaN"), json!("Infinity")];
        assert_eq!(median_of("snr", &values), 2.0);
        assert_eq!(median_of("snr", &[]), 0.0);
        let even = vec![json!(1.0), json!(2.0), json!(3.0), json!(10.0)];
        assert_eq!(median_of("snr", &even), 2.5);
    }
}
