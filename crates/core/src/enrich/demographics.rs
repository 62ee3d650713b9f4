//! Demographic merge: pin pattern to connect user, attribute lookups and
//! age normalization.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;

use crate::config::CompiledDemographics;
use crate::report::value_to_cell;
use crate::row::{Layer, SessionRow};
use crate::store::{CollectStore, Session};

pub fn merge(
    row: &mut SessionRow,
    store: &dyn CollectStore,
    session: &Session,
    demographics: &CompiledDemographics,
    today: NaiveDate,
) {
    let Some(found) = demographics.pattern.find(&session.pin) else {
        return;
    };
    let Ok(user_id) = found.as_str().parse::<i64>() else {
        tracing::warn!(
            pin = %session.pin,
            matched = found.as_str(),
            "demographics pattern matched a non-numeric id"
        );
        return;
    };
    let Some(user) = store.connect_user(user_id) else {
        return;
    };

    row.set(Layer::Demographics, "Connect User ID", Value::from(user.id));
    if let Some(country) = &user.country {
        row.set(Layer::Demographics, "Country", Value::String(country.clone()));
    }
    if let Some(state) = &user.state {
        row.set(Layer::Demographics, "State", Value::String(state.clone()));
    }
    if let Some(city) = &user.city {
        row.set(Layer::Demographics, "City", Value::String(city.clone()));
    }
    if let Some(email) = &user.email {
        row.set(Layer::Demographics, "Email", Value::String(email.clone()));
    }
    for (header, attribute_id) in &demographics.attributes {
        if let Some(value) = store.user_attribute(user.id, *attribute_id) {
            row.set(Layer::Demographics, header, Value::String(value.to_string()));
        }
    }

    // The explicit demographic age wins over any same-named field merged
    // from elsewhere; the bare Age field is only normalized when the
    // attribute set does not already carry the explicit one.
    if let Some(raw) = present(row, "Age (ia)") {
        row.replace("Age (ia)", parse_age(&raw, today));
    } else if !demographics.has_attribute("Age (ia)") {
        if let Some(raw) = present(row, "Age") {
            row.replace("Age", parse_age(&raw, today));
        }
    }
    if let Some(raw) = present(row, "age_bracket") {
        let parsed = parse_age(&raw, today);
        row.replace("age_bracket", Value::String(value_to_cell(&parsed)));
    }
}

fn present(row: &SessionRow, column: &str) -> Option<Value> {
    match row.get(column) {
        Some(Value::Null) | None => None,
        Some(Value::String(text)) if text.is_empty() => None,
        Some(value) => Some(value.clone()),
    }
}

/// Whole years between a date of birth and today, a birthday not yet
/// reached this year subtracting one. Unparseable input turns into a
/// diagnostic placeholder instead of failing the row.
pub fn parse_age(raw: &Value, today: NaiveDate) -> Value {
    match born_date(raw) {
        Some(born) => {
            let mut age = i64::from(today.year() - born.year());
            if (today.month(), today.day()) < (born.month(), born.day()) {
                age -= 1;
            }
            Value::from(age)
        }
        None => Value::String(format!("Unknown data format: {}", render_raw(raw))),
    }
}

fn born_date(raw: &Value) -> Option<NaiveDate> {
    let Value::String(text) = raw else {
        return None;
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.date());
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    None
}

fn render_raw(raw: &Value) -> String {
    match raw {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
