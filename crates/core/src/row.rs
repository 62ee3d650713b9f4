//! Per-session row assembly: the layered accumulator, the cache-reuse
//! decision and the full recompute path.

use std::collections::HashMap;

use chrono::NaiveDate;
use jsonschema::Validator;
use serde_json::Value;

use crate::cache::{CacheIndex, CachedSession};
use crate::columns::{ColumnSet, ResolvedColumns, STAT_BASE};
use crate::config::ReportOptions;
use crate::enrich;
use crate::enrich::geoip::GeoCache;
use crate::error::Result;
use crate::store::{CollectStore, Session};
use crate::validate;

/// Who wrote a cell. A later enrichment step may only overwrite a cell
/// claimed by a layer of lower or equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Base,
    Stats,
    Device,
    Inputs,
    Categories,
    Images,
    Demographics,
}

impl Layer {
    fn priority(self) -> u8 {
        match self {
            Layer::Base => 0,
            Layer::Stats => 1,
            Layer::Device => 2,
            Layer::Inputs | Layer::Categories | Layer::Images => 3,
            Layer::Demographics => 4,
        }
    }
}

/// Column name to claimed value; destroyed once flushed to the report.
#[derive(Debug, Clone, Default)]
pub struct SessionRow {
    cells: HashMap<String, (Layer, Value)>,
}

impl SessionRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a cell. Returns false (and leaves the cell alone) when a
    /// higher-priority layer already claimed the column.
    pub fn set(&mut self, layer: Layer, column: &str, value: Value) -> bool {
        if let Some((owner, _)) = self.cells.get(column) {
            if owner.priority() > layer.priority() {
                return false;
            }
        }
        self.cells.insert(column.to_string(), (layer, value));
        true
    }

    /// Rewrites an existing cell in place without changing its claim. Used
    /// by the substitution and normalization passes.
    pub fn replace(&mut self, column: &str, value: Value) {
        if let Some(cell) = self.cells.get_mut(column) {
            cell.1 = value;
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column).map(|(_, value)| value)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.cells.contains_key(column)
    }

    pub fn layer_of(&self, column: &str) -> Option<Layer> {
        self.cells.get(column).map(|(layer, _)| *layer)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// One row of the stats table: a file that failed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RejectionRow {
    pub session: String,
    pub file: String,
    pub reason: String,
    /// Raw stat values requested for diagnostic display.
    pub values: HashMap<String, Value>,
}

impl RejectionRow {
    pub fn cell(&self, column: &str) -> Option<Value> {
        match column {
            "Session" => Some(Value::String(self.session.clone())),
            "File" => Some(Value::String(self.file.clone())),
            "Reason" => Some(Value::String(self.reason.clone())),
            _ => self.values.get(column).cloned(),
        }
    }
}

/// Shared read-only state for one run, built before any session is
/// dispatched and passed by reference to every worker.
pub struct RunContext<'a> {
    pub options: &'a ReportOptions,
    pub columns: &'a ResolvedColumns,
    pub cache: &'a CacheIndex,
    pub geo: &'a GeoCache,
    pub validator: Option<&'a Validator>,
    pub today: NaiveDate,
}

#[derive(Debug)]
pub struct RowOutcome {
    pub row: SessionRow,
    pub rejections: Vec<RejectionRow>,
    pub cache_hit: bool,
}

/// The cache-reuse decision, pure in its inputs: reuse iff the cached row
/// is settled (completed or abandoned) or still matches the live item
/// count, unless the live session settled after the cache was written.
pub fn cache_decision(
    cached: Option<&CachedSession>,
    live_completed: bool,
    live_abandoned: bool,
    live_total: u64,
) -> bool {
    let Some(cached) = cached else {
        return false;
    };
    let settled = cached.completed() || cached.abandoned();
    let usable = settled || cached.total_items() == Some(live_total);
    let state_changed = !settled && (live_completed || live_abandoned);
    usable && !state_changed
}

pub fn build_session_row(
    ctx: &RunContext,
    store: &dyn CollectStore,
    session: &Session,
) -> Result<RowOutcome> {
    let mut row = SessionRow::new();
    let mut rejections = Vec::new();
    let mut cache_hit = false;

    if let Some(cached) = ctx.cache.get(&session.name) {
        let live_total = store.files_for(session.id).len() as u64;
        if cache_decision(Some(cached), session.completed, session.abandoned, live_total) {
            for column in ctx.columns.session.names() {
                if let Some(value) = cached.row.get(column) {
                    row.set(Layer::Base, column, Value::String(value.clone()));
                }
            }
            for stat_row in &cached.stats {
                rejections.push(remap_cached_rejection(stat_row, &ctx.columns.stat));
            }
            cache_hit = true;
        }
    }

    if !cache_hit {
        recompute(ctx, store, session, &mut row, &mut rejections);
    }

    // Image metadata is never cached: file content can change while the
    // session metadata stays identical. Substitutions and country
    // normalization are cheap and config may differ from the cached run.
    enrich::images::merge(&mut row, store, session, ctx.options.image_prompts.as_ref())?;
    enrich::substitute::apply(&mut row, &ctx.options.substitutions);
    if let Some(format) = ctx.options.countries {
        enrich::substitute::normalize_country(&mut row, format);
    }

    Ok(RowOutcome { row, rejections, cache_hit })
}

fn recompute(
    ctx: &RunContext,
    store: &dyn CollectStore,
    session: &Session,
    row: &mut SessionRow,
    rejections: &mut Vec<RejectionRow>,
) {
    let (tally, mut rows) = validate::tally_session_files(
        store,
        session,
        ctx.validator,
        &ctx.columns.stat,
        &ctx.options.exclude_corpus_codes,
        ctx.options.median_stats,
    );
    rejections.append(&mut rows);

    let duration = session
        .duration
        .unwrap_or_else(|| video_duration_fallback(store, session));

    row.set(Layer::Base, "Directory Name", Value::String(session.name.clone()));
    row.set(Layer::Base, "Pin", Value::String(session.pin.clone()));
    row.set(Layer::Base, "Total items", Value::from(tally.total));
    row.set(Layer::Base, "Recorded items", Value::from(tally.recorded));
    row.set(Layer::Base, "Skipped items", Value::from(tally.skipped));
    row.set(Layer::Base, "Rejected items", Value::from(tally.rejected));
    if let Some(number) = serde_json::Number::from_f64(duration) {
        row.set(Layer::Base, "Duration", Value::Number(number));
    }
    row.set(Layer::Base, "Date", Value::String(session.created.clone()));
    row.set(Layer::Base, "Completed", Value::Bool(session.completed));
    row.set(Layer::Base, "Abandoned", Value::Bool(session.abandoned));
    if let Some(email) = &session.email {
        row.set(Layer::Base, "Email", Value::String(email.clone()));
    }

    merge_prompt_attributes(row, session, &ctx.options.prompt_attributes);

    if ctx.options.median_stats && ctx.options.schema.is_some() {
        row.set(Layer::Stats, "missing_stats", Value::from(tally.missing_stats));
        for column in ctx.columns.stat.names().iter().skip(STAT_BASE.len()) {
            let values = tally.aggregates.get(column).map(Vec::as_slice).unwrap_or(&[]);
            let median = validate::median_of(column, values);
            if let Some(number) = serde_json::Number::from_f64(median) {
                row.set(Layer::Stats, column, Value::Number(number));
            }
        }
    }

    enrich::geoip::merge_device_info(row, session, ctx.geo);
    if let Some(demographics) = &ctx.options.demographics {
        enrich::demographics::merge(row, store, session, demographics, ctx.today);
    }
    if ctx.options.inputs && !ctx.columns.input_corpus_codes.is_empty() {
        enrich::inputs::merge(
            row,
            store,
            session,
            &ctx.columns.input_corpus_codes,
            &ctx.options.input_renames,
        );
    }
    enrich::categories::merge(row, session.script_number, &ctx.options.script_categories);
}

fn remap_cached_rejection(
    cells: &HashMap<String, String>,
    columns: &ColumnSet,
) -> RejectionRow {
    let mut rejection = RejectionRow::default();
    for column in columns.names() {
        let Some(value) = cells.get(column) else { continue };
        match column.as_str() {
            "Session" => rejection.session = value.clone(),
            "File" => rejection.file = value.clone(),
            "Reason" => rejection.reason = value.clone(),
            _ => {
                rejection.values.insert(column.clone(), Value::String(value.clone()));
            }
        }
    }
    rejection
}

/// Video and image sessions do not record an overall duration; derive one
/// by summing the video stat durations (milliseconds) across their files.
fn video_duration_fallback(store: &dyn CollectStore, session: &Session) -> f64 {
    let mut total = 0.0;
    for file in store.files_for(session.id) {
        if file.prompt_type != "video" {
            continue;
        }
        let Some(stat) = store.latest_stat(&file.path) else { continue };
        if let Some(milliseconds) = stat
            .json
            .get("video")
            .and_then(|video| video.get("duration"))
            .and_then(Value::as_f64)
        {
            total += milliseconds / 1000.0;
        }
    }
    total
}

fn merge_prompt_attributes(row: &mut SessionRow, session: &Session, keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    for prompt in &session.prompts {
        let Some(attributes) = prompt.attributes.as_ref().and_then(Value::as_object) else {
            continue;
        };
        for key in keys {
            if let Some(value) = attributes.get(key) {
                if !value.is_null() {
                    row.set(Layer::Base, key, value.clone());
                }
            }
        }
        if keys.iter().all(|key| row.contains(key)) {
            break;
        }
    }
}
