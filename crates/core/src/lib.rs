mod cache;
mod columns;
mod config;
mod enrich;
mod error;
mod pipeline;
mod report;
mod row;
mod store;
mod validate;

pub use cache::{backup_report, load_cache, CacheIndex, CachedSession};
pub use columns::{
    resolve_columns, ColumnSet, ResolvedColumns, SESSION_BASE, STAT_BASE, STAT_CATEGORIES,
};
pub use config::{
    compile_categories, CompiledCategory, CompiledDemographics, CountryFormat, DemographicsConfig,
    ImagePrompt, ImagePromptConfig, ReportOptions, RuleKey, ScriptCategory,
};
pub use enrich::demographics::parse_age;
pub use enrich::geoip::{GeoCache, GeoMeta, GeoProvider, NOT_AVAILABLE};
pub use enrich::images::dms_to_decimal;
pub use error::{ReportError, Result};
pub use pipeline::{run, RunSummary, DEFAULT_WORKERS};
pub use report::{sanitize, value_to_cell, ReportPaths, ReportWriter};
pub use row::{
    build_session_row, cache_decision, Layer, RejectionRow, RowOutcome, RunContext, SessionRow,
};
pub use store::{
    CollectStore, ConnectUser, FileRecord, InputField, InputPromptDef, MemoryStore, Project,
    ProjectSnapshot, Prompt, Session, SessionSnapshot, StatEntry, StatRecord, UserAttribute,
};
pub use validate::{
    compile_schema, median_of, tally_session_files, validation_reasons, FileTally,
    ELIGIBLE_PROMPT_TYPES,
};
