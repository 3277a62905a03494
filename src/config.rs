//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.sentitree.toml` files.

use crate::analysis::aggregator::{MAX_TREE_HEIGHT, MAX_TRUNK_HEIGHT, MIN_TRUNK_HEIGHT};
use crate::analysis::{BucketFreq, BucketLabel};
use crate::grammar::Direction;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".sentitree.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Temporal aggregation settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Grammar word geometry.
    #[serde(default)]
    pub grammar: GrammarConfig,

    /// Sentiment classifier settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Where the grammar word is written.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Where the hierarchy JSON is written, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy_output: Option<PathBuf>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            hierarchy_output: None,
            verbose: false,
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("tree.lsys")
}

/// Bucketing and contrast settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Bucket width as a pandas-style alias (`D`, `W-SUN`, `M`).
    #[serde(default)]
    pub bucket_freq: BucketFreq,

    /// Which bucket edge names the bucket (`start` or `end`).
    #[serde(default)]
    pub bucket_label: BucketLabel,

    /// Exponent of the contrast stretch; must be positive.
    #[serde(default = "default_contrast_factor")]
    pub contrast_factor: f64,

    #[serde(default = "default_max_tree_height")]
    pub max_tree_height: f64,

    #[serde(default = "default_min_trunk_height")]
    pub min_trunk_height: f64,

    #[serde(default = "default_max_trunk_height")]
    pub max_trunk_height: f64,

    /// Emit `normalized_count` (`ln(1 + count) * 5`) per bucket.
    #[serde(default = "default_true")]
    pub normalized_count: bool,

    /// Emit `raw_count` per bucket.
    #[serde(default = "default_true")]
    pub raw_count: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_freq: BucketFreq::default(),
            bucket_label: BucketLabel::default(),
            contrast_factor: default_contrast_factor(),
            max_tree_height: default_max_tree_height(),
            min_trunk_height: default_min_trunk_height(),
            max_trunk_height: default_max_trunk_height(),
            normalized_count: true,
            raw_count: true,
        }
    }
}

fn default_contrast_factor() -> f64 {
    2.0
}

fn default_max_tree_height() -> f64 {
    MAX_TREE_HEIGHT
}

fn default_min_trunk_height() -> f64 {
    MIN_TRUNK_HEIGHT
}

fn default_max_trunk_height() -> f64 {
    MAX_TRUNK_HEIGHT
}

fn default_true() -> bool {
    true
}

/// Geometry constants of the grammar word.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrammarConfig {
    #[serde(default = "default_trunk_segment_height")]
    pub trunk_segment_height: f64,

    #[serde(default = "default_week_step")]
    pub week_step: f64,

    #[serde(default = "default_week_length_base")]
    pub week_length_base: f64,

    #[serde(default = "default_week_length_scale")]
    pub week_length_scale: f64,

    /// Lean of the first month branch (`right` = `+`, `left` = `-`).
    #[serde(default)]
    pub first_branch: Direction,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            trunk_segment_height: default_trunk_segment_height(),
            week_step: default_week_step(),
            week_length_base: default_week_length_base(),
            week_length_scale: default_week_length_scale(),
            first_branch: Direction::default(),
        }
    }
}

fn default_trunk_segment_height() -> f64 {
    20.0
}

fn default_week_step() -> f64 {
    8.0
}

fn default_week_length_base() -> f64 {
    10.0
}

fn default_week_length_scale() -> f64 {
    0.5
}

/// Ollama sentiment classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Classify messages instead of reading `sentiment_score` from the input.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default)]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Messages per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Requests in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries per batch on transport or parse failure.
    #[serde(default = "default_retries")]
    pub retries: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_model(),
            ollama_url: default_ollama_url(),
            temperature: 0.0,
            timeout_seconds: default_timeout(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            retries: default_retries(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_batch_size() -> usize {
    64
}

fn default_concurrency() -> usize {
    4
}

fn default_retries() -> usize {
    3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.clone();
        }
        if let Some(ref hierarchy_out) = args.hierarchy_out {
            self.general.hierarchy_output = Some(hierarchy_out.clone());
        }

        if let Some(freq) = args.bucket_freq {
            self.aggregation.bucket_freq = freq;
        }
        if let Some(factor) = args.contrast {
            self.aggregation.contrast_factor = factor;
        }

        if let Some(direction) = args.first_branch {
            self.grammar.first_branch = direction;
        }

        if args.classify {
            self.classifier.enabled = true;
        }
        if let Some(ref model) = args.model {
            self.classifier.model = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.classifier.ollama_url = url.clone();
        }
        if let Some(batch_size) = args.batch_size {
            self.classifier.batch_size = batch_size;
        }
        if let Some(concurrency) = args.concurrency {
            self.classifier.concurrency = concurrency;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
