//! TOML configuration.
//!
//! Every section and field is optional; an empty file is a valid config.
//!
//! ```toml
//! [search]
//! debounce_ms = 200
//! worker_threads = 0      # 0 = available parallelism
//! display_limit = 500
//!
//! [scoring]
//! keyword_weight = 100
//! content_occurrence_weight = 5
//! content_occurrence_cap = 10
//! attachment_name_weight = 50
//!
//! [content_types]
//! text_extensions = ["rs", "java", "txt"]
//! image_extensions = ["png", "jpg"]
//!
//! [logging]
//! level = "info"
//! dir = "/var/log/codelib"
//!
//! [library]
//! path = "/home/me/snippets.zcl2"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::content_detection::{ContentTypeTable, DEFAULT_IMAGE_EXTENSIONS, DEFAULT_TEXT_EXTENSIONS};
use crate::engine::SearchOptions;
use crate::interface::{CodeLibError, CodeLibResult};
use crate::logging::{default_log_level, parse_level};
use crate::ranking::ScoringWeights;
use crate::search::{parse_query, ParsedQuery};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub content_types: ContentTypesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub library: LibraryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub worker_threads: usize,
    /// Upper bound on listed hits for browse-all output.
    #[serde(default = "default_display_limit")]
    pub display_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            worker_threads: 0,
            display_limit: default_display_limit(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    200
}
fn default_display_limit() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: u32,
    #[serde(default = "default_content_occurrence_weight")]
    pub content_occurrence_weight: u32,
    #[serde(default = "default_content_occurrence_cap")]
    pub content_occurrence_cap: u32,
    #[serde(default = "default_attachment_name_weight")]
    pub attachment_name_weight: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_keyword_weight(),
            content_occurrence_weight: default_content_occurrence_weight(),
            content_occurrence_cap: default_content_occurrence_cap(),
            attachment_name_weight: default_attachment_name_weight(),
        }
    }
}

fn default_keyword_weight() -> u32 {
    ScoringWeights::default().keyword_weight
}
fn default_content_occurrence_weight() -> u32 {
    ScoringWeights::default().content_occurrence_weight
}
fn default_content_occurrence_cap() -> u32 {
    ScoringWeights::default().content_occurrence_cap
}
fn default_attachment_name_weight() -> u32 {
    ScoringWeights::default().attachment_name_weight
}

impl From<&ScoringConfig> for ScoringWeights {
    fn from(config: &ScoringConfig) -> Self {
        Self {
            keyword_weight: config.keyword_weight,
            content_occurrence_weight: config.content_occurrence_weight,
            content_occurrence_cap: config.content_occurrence_cap,
            attachment_name_weight: config.attachment_name_weight,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentTypesConfig {
    #[serde(default = "default_text_extensions")]
    pub text_extensions: Vec<String>,
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

impl Default for ContentTypesConfig {
    fn default() -> Self {
        Self {
            text_extensions: default_text_extensions(),
            image_extensions: default_image_extensions(),
        }
    }
}

fn default_text_extensions() -> Vec<String> {
    DEFAULT_TEXT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}
fn default_image_extensions() -> Vec<String> {
    DEFAULT_IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

impl ContentTypesConfig {
    pub fn table(&self) -> ContentTypeTable {
        ContentTypeTable::new(&self.text_extensions, &self.image_extensions)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
        }
    }
}

fn default_level() -> String {
    default_log_level().to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LibraryConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// [`Config::load`] when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> CodeLibResult<()> {
        if self.scoring.content_occurrence_cap == 0 {
            return Err(CodeLibError::Configuration(
                "scoring.content_occurrence_cap must be > 0".to_string(),
            ));
        }
        let extensions = self
            .content_types
            .text_extensions
            .iter()
            .chain(&self.content_types.image_extensions);
        for ext in extensions {
            if ext.trim().trim_start_matches('.').is_empty() {
                return Err(CodeLibError::Configuration(
                    "content_types entries must not be empty".to_string(),
                ));
            }
        }
        parse_level(&self.logging.level)?;
        Ok(())
    }

    /// Library to operate on: `explicit` if given, else `[library] path`.
    pub fn library_path(&self, explicit: Option<&Path>) -> CodeLibResult<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.library.path.clone())
            .ok_or_else(|| {
                CodeLibError::Configuration(
                    "no library given: pass --library or set [library] path".to_string(),
                )
            })
    }

    /// How many hits to print for `query`. Only browse-all (`*`) listings
    /// are capped; relevance searches print everything.
    pub fn display_limit_for(&self, query: &str) -> Option<usize> {
        matches!(parse_query(query), ParsedQuery::BrowseAll).then_some(self.search.display_limit)
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            worker_threads: self.search.worker_threads,
            debounce: Duration::from_millis(self.search.debounce_ms),
            weights: ScoringWeights::from(&self.scoring),
        }
    }
}
