//! Loads the operator-supplied JSON rule files into the core option set.

use std::collections::{HashMap, HashSet};
use std::fs;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use session_report_core::{
    compile_categories, CompiledDemographics, CountryFormat, DemographicsConfig,
    ImagePromptConfig, ReportOptions, ScriptCategory,
};

use crate::cli::Cli;

pub fn build_options(cli: &Cli) -> Result<ReportOptions> {
    let schema: Option<Value> = load_optional(&cli.schema, "schema")?;
    let demographics = match load_optional::<DemographicsConfig>(&cli.demographics, "demographics")? {
        Some(raw) => Some(CompiledDemographics::compile(&raw)?),
        None => None,
    };
    let script_categories =
        match load_optional::<Vec<ScriptCategory>>(&cli.script_categories, "script categories")? {
            Some(raw) => compile_categories(&raw),
            None => Vec::new(),
        };
    let image_prompts: Option<ImagePromptConfig> =
        load_optional(&cli.image_prompts, "image prompts")?;
    let substitutions: HashMap<String, HashMap<String, Value>> =
        load_optional(&cli.substitutions, "substitutions")?.unwrap_or_default();
    let input_renames: HashMap<String, String> =
        load_optional(&cli.input_renames, "input renames")?.unwrap_or_default();
    let exclude_corpus_codes: HashSet<String> =
        load_optional::<Vec<String>>(&cli.exclude_corpus_codes, "corpus code")?
            .map(|codes| codes.into_iter().collect())
            .unwrap_or_default();
    let countries = match &cli.countries {
        Some(raw) => Some(
            CountryFormat::parse(raw).ok_or_else(|| anyhow!("unknown country format {raw}"))?,
        ),
        None => None,
    };
    Ok(ReportOptions {
        schema,
        demographics,
        script_categories,
        image_prompts,
        prompt_attributes: cli.prompt_attributes.clone(),
        substitutions,
        input_renames,
        exclude_corpus_codes,
        median_stats: cli.median_stats,
        bluetooth: cli.bluetooth,
        inputs: cli.inputs,
        countries,
    })
}

fn load_optional<T: DeserializeOwned>(path: &Option<String>, what: &str) -> Result<Option<T>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {what} file {path}"))?;
    let parsed =
        serde_json::from_str(&raw).with_context(|| format!("invalid {what} file {path}"))?;
    Ok(Some(parsed))
}
