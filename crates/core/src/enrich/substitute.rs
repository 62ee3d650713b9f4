//! The always-on finishing pass: configured value substitutions, then
//! country-format normalization.

use std::collections::HashMap;

use serde_json::Value;

use crate::config::CountryFormat;
use crate::row::SessionRow;

/// Replaces a cell's value when its string form is a key of the configured
/// map for that column; everything else is left unchanged.
pub fn apply(row: &mut SessionRow, substitutions: &HashMap<String, HashMap<String, Value>>) {
    for (column, mapping) in substitutions {
        let Some(current) = row.get(column) else {
            continue;
        };
        let key = plain(current).trim().to_string();
        if let Some(replacement) = mapping.get(&key) {
            row.replace(column, replacement.clone());
        }
    }
}

/// Rewrites the Country cell into the requested format, resolving the
/// current value as alpha-3, then alpha-2, then full name. Unresolvable
/// values stay as they are.
pub fn normalize_country(row: &mut SessionRow, format: CountryFormat) {
    let raw = match row.get("Country") {
        Some(Value::String(text)) if !text.is_empty() => text.clone(),
        _ => return,
    };
    let Some(country) = resolve_country(&raw) else {
        return;
    };
    let rewritten = match format {
        CountryFormat::Alpha2 => country.alpha2,
        CountryFormat::Alpha3 => country.alpha3,
        CountryFormat::FullName => country.name,
    };
    row.replace("Country", Value::String(rewritten.to_string()));
}

fn resolve_country(raw: &str) -> Option<rust_iso3166::CountryCode> {
    rust_iso3166::from_alpha3(raw)
        .or_else(|| rust_iso3166::from_alpha2(raw))
        .or_else(|| {
            rust_iso3166::ALL
                .iter()
                .find(|country| country.name.eq_ignore_ascii_case(raw))
                .copied()
        })
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
