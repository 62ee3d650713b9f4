//! Column resolution. The session and stat column sets are built once from
//! configuration, then shared read-only by the cache check, the validator
//! and the output writer.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;

use crate::config::ReportOptions;
use crate::error::{ReportError, Result};
use crate::store::InputPromptDef;

pub const SESSION_BASE: &[&str] = &[
    "Directory Name",
    "Pin",
    "Total items",
    "Recorded items",
    "Skipped items",
    "Rejected items",
    "Duration",
    "Date",
    "Completed",
    "Abandoned",
    "Email",
    "Device IP",
    "Device ID",
    "Device Model",
    "Device OS",
    "Country",
    "Country Code",
    "Region",
    "Region Name",
];

pub const STAT_BASE: &[&str] = &["Session", "File", "Reason"];

/// Schema properties that nest their fields one level down.
pub const STAT_CATEGORIES: &[&str] = &["video", "audio", "image"];

/// Ordered, duplicate-free list of output column names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    names: Vec<String>,
}

impl ColumnSet {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for name in names {
            set.push(name);
        }
        set
    }

    /// Appends a column unless it is already present.
    pub fn push(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.contains(&name) {
            self.names.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|existing| existing == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name_set(&self) -> HashSet<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedColumns {
    pub session: ColumnSet,
    pub stat: ColumnSet,
    /// Corpus codes whose files carry free-text input JSON.
    pub input_corpus_codes: HashSet<String>,
}

/// Builds both column sets. Pure in the configuration and the project's
/// prompt definitions; never looks at session data.
pub fn resolve_columns(
    options: &ReportOptions,
    input_prompts: &[InputPromptDef],
) -> Result<ResolvedColumns> {
    let mut session = ColumnSet::from_names(SESSION_BASE.iter().copied());
    let mut stat = ColumnSet::from_names(STAT_BASE.iter().copied());

    if let Some(schema) = &options.schema {
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| ReportError::InvalidSchema("schema has no properties object".into()))?;
        let mut keys: Vec<&String> = properties.keys().collect();
        keys.sort();
        for key in keys {
            if STAT_CATEGORIES.contains(&key.as_str()) {
                let Some(nested) = properties[key].get("properties").and_then(Value::as_object)
                else {
                    tracing::warn!(property = %key, "schema category without nested properties, skipping");
                    continue;
                };
                for inner in nested.keys() {
                    let column = format!("{key}/{inner}");
                    stat.push(column.clone());
                    if options.median_stats {
                        session.push(column);
                    }
                }
            } else {
                stat.push(key.clone());
                if options.median_stats {
                    session.push(key.clone());
                }
            }
        }
        if options.median_stats {
            session.push("missing_stats");
        }
    }

    if let Some(demographics) = &options.demographics {
        for name in ["Connect User ID", "Country", "State", "City"] {
            session.push(name);
        }
        for (header, _) in &demographics.attributes {
            session.push(header.clone());
        }
    }

    for category in &options.script_categories {
        session.push(category.title.clone());
    }

    if options.bluetooth {
        session.push("Bluetooth Name");
        session.push("Bluetooth Type");
    }

    let mut input_corpus_codes = HashSet::new();
    if options.inputs {
        let mut names = BTreeSet::new();
        for prompt in input_prompts {
            input_corpus_codes.insert(prompt.corpus_code.clone());
            for field in &prompt.inputs {
                let display = options
                    .input_renames
                    .get(&field.name)
                    .cloned()
                    .unwrap_or_else(|| field.name.clone());
                names.insert(display);
            }
        }
        if names.is_empty() {
            tracing::warn!("input columns requested, but the project has no input prompts");
        }
        for name in names {
            session.push(name);
        }
    }

    if let Some(images) = &options.image_prompts {
        if images.prompts.is_empty() {
            return Err(ReportError::InvalidConfig(
                "image prompt config must name at least one prompt".into(),
            ));
        }
        for prompt in &images.prompts {
            session.push(format!("{}_photo_Lat", prompt.name));
            session.push(format!("{}_photo_Lng", prompt.name));
            session.push(format!("{}_photo_EXIF", prompt.name));
            session.push(format!("{}_photo_URL", prompt.name));
            if images.has_status(&prompt.name) {
                session.push(format!("{}_status", prompt.name));
            }
            if images.has_category(&prompt.name) {
                session.push(format!("{}_category", prompt.name));
            }
        }
    }

    for key in &options.prompt_attributes {
        session.push(key.clone());
    }

    Ok(ResolvedColumns { session, stat, input_corpus_codes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{compile_categories, ImagePrompt, ImagePromptConfig, ScriptCategory};
    use crate::store::InputField;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "properties": {
                "snr": {"type": "number"},
                "clipping": {"type": "number"},
                "video": {"properties": {"duration": {}, "fps": {}}},
                "audio": {"properties": {"samplerate": {}}}
            }
        })
    }

    #[test]
    fn base_columns_without_configuration() {
        let columns = resolve_columns(&ReportOptions::default(), &[]).unwrap();
        assert_eq!(columns.session.names().len(), SESSION_BASE.len());
        assert_eq!(columns.stat.names(), &["Session", "File", "Reason"]);
    }

    #[test]
    fn schema_expands_sorted_with_nested_categories() {
        let options = ReportOptions { schema: Some(schema()), ..Default::default() };
        let columns = resolve_columns(&options, &[]).unwrap();
        let stat: Vec<&str> = columns.stat.names().iter().map(String::as_str).collect();
        assert_eq!(
            stat,
            vec![
                "Session",
                "File",
                "Reason",
                "audio/samplerate",
                "clipping",
                "snr",
                "video/duration",
                "video/fps",
            ]
        );
        // Without median aggregation no stat column reaches the session table.
        assert!(!columns.session.contains("snr"));
        assert!(!columns.session.contains("missing_stats"));
    }

    #[test]
    fn median_flag_mirrors_stat_columns_into_session_set() {
        let options =
            ReportOptions { schema: Some(schema()), median_stats: true, ..Default::default() };
        let columns = resolve_columns(&options, &[]).unwrap();
        for name in ["audio/samplerate", "clipping", "snr", "video/duration", "missing_stats"] {
            assert!(columns.session.contains(name), "missing {name}");
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let categories = compile_categories(
            &serde_json::from_value::<Vec<ScriptCategory>>(json!([
                {"title": "Wave", "rules": {"1-3": "early"}}
            ]))
            .unwrap(),
        );
        let build = || {
            let options = ReportOptions {
                schema: Some(schema()),
                script_categories: categories.clone(),
                median_stats: true,
                bluetooth: true,
                ..Default::default()
            };
            resolve_columns(&options, &[]).unwrap()
        };
        assert_eq!(build().session, build().session);
        assert_eq!(build().stat, build().stat);
    }

    #[test]
    fn input_prompts_yield_sorted_renamed_columns_and_codes() {
        let prompts = vec![InputPromptDef {
            corpus_code: "1input1".into(),
            inputs: vec![
                InputField { name: "Zip_Code".into() },
                InputField { name: "Please leave feedback below".into() },
            ],
        }];
        let options = ReportOptions {
            inputs: true,
            input_renames: std::collections::HashMap::from([(
                "Please leave feedback below".to_string(),
                "business_status_comment".to_string(),
            )]),
            ..Default::default()
        };
        let columns = resolve_columns(&options, &prompts).unwrap();
        assert!(columns.session.contains("business_status_comment"));
        assert!(columns.session.contains("Zip_Code"));
        assert!(columns.input_corpus_codes.contains("1input1"));
    }

    #[test]
    fn image_prompts_emit_photo_status_and_category_columns() {
        let options = ReportOptions {
            image_prompts: Some(ImagePromptConfig {
                prompts: vec![
                    ImagePrompt { name: "ev_station".into(), corpus_code: "1image1".into() },
                    ImagePrompt { name: "plug".into(), corpus_code: "1image3".into() },
                ],
                status_exceptions: vec!["plug".into()],
                category_prompt: Some("ev_station".into()),
            }),
            ..Default::default()
        };
        let columns = resolve_columns(&options, &[]).unwrap();
        for name in [
            "ev_station_photo_Lat",
            "ev_station_photo_Lng",
            "ev_station_photo_EXIF",
            "ev_station_photo_URL",
            "ev_station_status",
            "ev_station_category",
            "plug_photo_URL",
        ] {
            assert!(columns.session.contains(name), "missing {name}");
        }
        assert!(!columns.session.contains("plug_status"));
        assert!(!columns.session.contains("plug_category"));
    }

    #[test]
    fn empty_image_prompt_list_is_a_configuration_error() {
        let options = ReportOptions {
            image_prompts: Some(ImagePromptConfig {
                prompts: vec![],
                status_exceptions: vec![],
                category_prompt: None,
            }),
            ..Default::default()
        };
        assert!(resolve_columns(&options, &[]).is_err());
    }

    #[test]
    fn duplicate_columns_are_not_appended_twice() {
        let mut set = ColumnSet::from_names(["Country", "City"]);
        set.push("Country");
        assert_eq!(set.names().len(), 2);
    }
}
