//! Run configuration: the rule sets the operator supplies as JSON files,
//! compiled once before any session is processed.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ReportError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryFormat {
    Alpha2,
    Alpha3,
    FullName,
}

impl CountryFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "alpha2" | "alpha_2" => Some(Self::Alpha2),
            "alpha3" | "alpha_3" => Some(Self::Alpha3),
            "full_name" | "full-name" => Some(Self::FullName),
            _ => None,
        }
    }
}

/// One compiled script-number membership test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKey {
    Exact(i64),
    Range(i64, i64),
}

impl RuleKey {
    /// Accepts `"12"` or `"5-7"`; anything else is rejected at compile time.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed.parse().ok().map(Self::Exact);
        }
        let (low, high) = trimmed.split_once('-')?;
        if low.is_empty()
            || high.is_empty()
            || !low.bytes().all(|b| b.is_ascii_digit())
            || !high.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        Some(Self::Range(low.parse().ok()?, high.parse().ok()?))
    }

    pub fn matches(&self, script_number: i64) -> bool {
        match self {
            Self::Exact(value) => script_number == *value,
            Self::Range(low, high) => (*low..=*high).contains(&script_number),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptCategory {
    pub title: String,
    #[serde(default)]
    pub rules: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct CompiledCategory {
    pub title: String,
    pub rules: Vec<(RuleKey, Value)>,
}

/// Malformed rule keys are reported and dropped; they never match.
pub fn compile_categories(raw: &[ScriptCategory]) -> Vec<CompiledCategory> {
    raw.iter()
        .map(|category| {
            let mut rules = Vec::new();
            for (key, value) in &category.rules {
                match RuleKey::parse(key) {
                    Some(rule) => rules.push((rule, value.clone())),
                    None => tracing::warn!(
                        category = %category.title,
                        rule = %key,
                        "unrecognised script category rule, dropping"
                    ),
                }
            }
            CompiledCategory { title: category.title.clone(), rules }
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemographicsConfig {
    /// Pattern extracting the numeric connect-user id from a pin.
    pub pattern: String,
    /// Output header to connect attribute id.
    #[serde(default)]
    pub attributes: HashMap<String, i64>,
}

#[derive(Debug, Clone)]
pub struct CompiledDemographics {
    pub pattern: Regex,
    /// Sorted by header so column order and merges stay deterministic.
    pub attributes: Vec<(String, i64)>,
}

impl CompiledDemographics {
    pub fn compile(config: &DemographicsConfig) -> Result<Self> {
        let pattern = Regex::new(&config.pattern)
            .map_err(|e| ReportError::InvalidConfig(format!("demographics pattern: {e}")))?;
        let mut attributes: Vec<(String, i64)> = config
            .attributes
            .iter()
            .map(|(header, id)| (header.clone(), *id))
            .collect();
        attributes.sort();
        Ok(Self { pattern, attributes })
    }

    pub fn has_attribute(&self, header: &str) -> bool {
        self.attributes.iter().any(|(name, _)| name == header)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagePrompt {
    pub name: String,
    pub corpus_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagePromptConfig {
    pub prompts: Vec<ImagePrompt>,
    /// Prompts that do not carry a free-text status column.
    #[serde(default)]
    pub status_exceptions: Vec<String>,
    /// The one prompt that also gets a category column.
    #[serde(default)]
    pub category_prompt: Option<String>,
}

impl ImagePromptConfig {
    pub fn prompt_for(&self, corpus_code: &str) -> Option<&str> {
        self.prompts
            .iter()
            .find(|prompt| prompt.corpus_code == corpus_code)
            .map(|prompt| prompt.name.as_str())
    }

    pub fn has_status(&self, name: &str) -> bool {
        !self.status_exceptions.iter().any(|excepted| excepted == name)
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.category_prompt.as_deref() == Some(name)
    }
}

/// Everything the resolver and the row builder read; immutable for the run.
#[derive(Debug, Default)]
pub struct ReportOptions {
    pub schema: Option<Value>,
    pub demographics: Option<CompiledDemographics>,
    pub script_categories: Vec<CompiledCategory>,
    pub image_prompts: Option<ImagePromptConfig>,
    pub prompt_attributes: Vec<String>,
    pub substitutions: HashMap<String, HashMap<String, Value>>,
    pub input_renames: HashMap<String, String>,
    pub exclude_corpus_codes: HashSet<String>,
    pub median_stats: bool,
    pub bluetooth: bool,
    pub inputs: bool,
    pub countries: Option<CountryFormat>,
}
