//! TOML configuration parsing and validation.
//!
//! A single file (default `./config/forge.toml`) describes where lesson
//! resources live, the extraction heuristics, the run scope, the text
//! generation provider, and the templates per output kind. The `[run]`
//! table becomes the immutable [`RunConfig`] that is passed to the pipeline.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::lesson_code::LessonCode;
use crate::models::{Attainment, MergePolicy, OutputKind};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub extraction: ExtractionRules,
    pub run: RunConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub outputs: HashMap<String, OutputConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub root: PathBuf,
    #[serde(default = "default_spreadsheet_globs")]
    pub spreadsheet_globs: Vec<String>,
    #[serde(default = "default_deck_globs")]
    pub deck_globs: Vec<String>,
    #[serde(default)]
    pub readnow_dir: Option<PathBuf>,
    #[serde(default = "default_readnow_globs")]
    pub readnow_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_spreadsheet_globs() -> Vec<String> {
    vec!["**/Unit Guidance/**/*.xlsx".to_string()]
}
fn default_deck_globs() -> Vec<String> {
    vec!["**/*.pptx".to_string()]
}
fn default_readnow_globs() -> Vec<String> {
    vec!["**/*.docx".to_string()]
}

/// Inclusive range of 1-based slide numbers.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SlideRange {
    pub first: usize,
    pub last: usize,
}

/// Named, overridable heuristics used by the field extractor.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionRules {
    pub objective_slides: SlideRange,
    pub objective_headers: Vec<String>,
    pub objective_prefixes: Vec<String>,
    pub objective_stop_markers: Vec<String>,
    pub objective_excludes: Vec<String>,
    pub header_search_rows: usize,
    pub code_search_columns: usize,
    pub title_column_offset: usize,
    pub objective_column_offset: usize,
    /// Column letter or `"F:G"` range. When unset, the column whose header
    /// mentions "exit ticket" is used.
    pub exit_ticket_columns: Option<String>,
    pub mark_scheme_heading: String,
    pub merge: MergePolicy,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            objective_slides: SlideRange { first: 4, last: 7 },
            objective_headers: vec![
                "students will be able to".to_string(),
                "learning objectives".to_string(),
                "by the end of this lesson".to_string(),
            ],
            objective_prefixes: vec![
                "•".to_string(),
                "- ".to_string(),
                "I can ".to_string(),
                "To ".to_string(),
            ],
            objective_stop_markers: vec!["key word".to_string()],
            objective_excludes: vec![
                "fix-it".to_string(),
                "customise".to_string(),
                "reteach".to_string(),
                "redrafting".to_string(),
            ],
            header_search_rows: 8,
            code_search_columns: 3,
            title_column_offset: 1,
            objective_column_offset: 2,
            exit_ticket_columns: None,
            mark_scheme_heading: "MARK SCHEME".to_string(),
            merge: MergePolicy::FirstWins,
        }
    }
}

/// Immutable snapshot of the options for one invocation.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RunConfig {
    #[serde(default)]
    pub target_lesson: Option<LessonCode>,
    #[serde(default)]
    pub target_unit: Option<String>,
    #[serde(default)]
    pub lesson_code_prefix: Option<String>,
    pub student_year: String,
    pub attainment: Attainment,
    pub reading_age: u32,
    pub word_count: WordCountRange,
    #[serde(default = "default_language_style")]
    pub language_style: String,
}

fn default_language_style() -> String {
    "simple language, short sentences (max 12 words), everyday examples".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct WordCountRange {
    pub min: u32,
    pub max: u32,
}

impl RunConfig {
    /// Whether a catalog lesson falls inside this run's filters.
    pub fn in_scope(&self, code: &LessonCode) -> bool {
        if let Some(target) = &self.target_lesson {
            return target == code;
        }
        let unit_ok = self
            .target_unit
            .as_deref()
            .map_or(true, |unit| code.has_prefix(unit));
        let prefix_ok = self
            .lesson_code_prefix
            .as_deref()
            .map_or(true, |prefix| code.has_prefix(prefix));
        unit_ok && prefix_ok
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_retries: 3,
            timeout_secs: 30,
            temperature: 0.7,
            max_tokens: 1200,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1200
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// What to do when a required field is still empty at render time.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingFieldPolicy {
    #[default]
    Mark,
    Skip,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub on_missing: MissingFieldPolicy,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            on_missing: MissingFieldPolicy::Mark,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub template: PathBuf,
}

impl Config {
    /// Template path configured for an output kind.
    pub fn template_for(&self, kind: OutputKind) -> Option<&Path> {
        self.outputs
            .get(kind.as_str())
            .map(|output| output.template.as_path())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Catalog
    if config.catalog.spreadsheet_globs.is_empty() && config.catalog.deck_globs.is_empty() {
        bail!("catalog needs at least one spreadsheet_globs or deck_globs pattern");
    }

    // Extraction
    let slides = config.extraction.objective_slides;
    if slides.first == 0 || slides.first > slides.last {
        bail!(
            "extraction.objective_slides must satisfy 1 <= first <= last (got {}..{})",
            slides.first,
            slides.last
        );
    }
    if config.extraction.code_search_columns == 0 {
        bail!("extraction.code_search_columns must be > 0");
    }

    // Run
    let words = config.run.word_count;
    if words.min == 0 || words.min > words.max {
        bail!(
            "run.word_count must satisfy 0 < min <= max (got {}-{})",
            words.min,
            words.max
        );
    }
    if config.run.reading_age == 0 {
        bail!("run.reading_age must be > 0");
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "anthropic" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, anthropic, or ollama.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    if config.generation.max_retries > 10 {
        bail!("generation.max_retries must be <= 10");
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }

    for name in config.outputs.keys() {
        if name.parse::<OutputKind>().is_err() {
            bail!(
                "Unknown output kind in [outputs.{}]. Must be slides, readnow, worksheet, review, or proforma.",
                name
            );
        }
    }

    Ok(())
}
