//! Free-text input merge: raw JSON input files recorded next to a session,
//! plus language-code resolution for two known fields.

use std::collections::{HashMap, HashSet};
use std::fs;

use serde_json::Value;

use crate::row::{Layer, SessionRow};
use crate::store::{CollectStore, Session};

pub const LANGUAGE_COLUMNS: &[&str] = &["First_Language", "Primary_home_language"];

pub fn merge(
    row: &mut SessionRow,
    store: &dyn CollectStore,
    session: &Session,
    input_corpus_codes: &HashSet<String>,
    renames: &HashMap<String, String>,
) {
    for file in store.files_for(session.id) {
        let Some(code) = file.corpus_code.as_deref() else {
            continue;
        };
        if !input_corpus_codes.contains(code) {
            continue;
        }
        // Unreadable or malformed input files are skipped silently.
        let Ok(raw) = fs::read_to_string(&file.path) else {
            continue;
        };
        let Ok(data) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        let Some(entries) = data.as_array() else {
            continue;
        };
        for entry in entries {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(user_input) = entry.get("user_input") else {
                continue;
            };
            if !truthy(user_input) {
                continue;
            }
            let display = renames.get(name).map(String::as_str).unwrap_or(name);
            row.set(Layer::Inputs, display, user_input.clone());
        }
    }

    for column in LANGUAGE_COLUMNS {
        let code = match row.get(column) {
            Some(Value::String(code)) => code.clone(),
            _ => continue,
        };
        if let Some(language) = isolang::Language::from_639_3(&code) {
            row.replace(column, Value::String(language.to_name().to_string()));
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}
