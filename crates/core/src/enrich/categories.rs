//! Script-category merge: first matching compiled rule wins per category.

use crate::config::CompiledCategory;
use crate::row::{Layer, SessionRow};

pub fn merge(
    row: &mut SessionRow,
    script_number: Option<i64>,
    categories: &[CompiledCategory],
) {
    if categories.is_empty() {
        return;
    }
    let Some(script_number) = script_number else {
        return;
    };
    for category in categories {
        for (rule, value) in &category.rules {
            if rule.matches(script_number) {
                row.set(Layer::Categories, &category.title, value.clone());
                break;
            }
        }
    }
}
