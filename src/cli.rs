//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::analysis::BucketFreq;
use crate::grammar::Direction;
use crate::ingest::InputFormat;
use clap::Parser;
use std::path::PathBuf;

/// Sentitree - grow an L-system tree out of a chat history
///
/// Reads sentiment-scored messages, aggregates them per week and month,
/// and writes an L-system word a renderer can turn into a tree.
///
/// Examples:
///   sentitree --input chat.csv
///   sentitree --input chat.csv --bucket-freq W-MON --contrast 2.5
///   sentitree --input raw.json --classify --model llama3.2:latest
///   sentitree --input chat.csv --hierarchy-out tree.json
///   sentitree --from-hierarchy tree.json --output tree.lsys
///   sentitree --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Message table to read (.csv or .json)
    ///
    /// Columns: send_datetime, message, is_analyzable, sentiment_score
    /// (or sentiment + certainty). Not needed with --from-hierarchy.
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present_any = ["init_config", "from_hierarchy"]
    )]
    pub input: Option<PathBuf>,

    /// Output file for the grammar word
    ///
    /// Default: from config or tree.lsys
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .sentitree.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Also write the aggregated hierarchy as JSON
    #[arg(long, value_name = "FILE")]
    pub hierarchy_out: Option<PathBuf>,

    /// Produce the word from a previously written hierarchy JSON
    ///
    /// Skips reading messages and aggregation entirely.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["input", "classify"])]
    pub from_hierarchy: Option<PathBuf>,

    /// Bucket width: D, W (= W-SUN), W-MON .. W-SAT, or M
    #[arg(long, value_name = "FREQ")]
    pub bucket_freq: Option<BucketFreq>,

    /// Contrast factor applied to bucket sentiment (> 0)
    ///
    /// Values above 1 exaggerate differences from neutral, below 1 dampen them.
    #[arg(long, value_name = "FACTOR")]
    pub contrast: Option<f64>,

    /// Lean of the first month branch; later months alternate
    #[arg(long, value_name = "SIDE")]
    pub first_branch: Option<Direction>,

    /// Classify messages with Ollama instead of reading sentiment_score
    #[arg(long)]
    pub classify: bool,

    /// Ollama model used by --classify
    #[arg(short, long, env = "SENTITREE_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Messages per classification request
    #[arg(long, value_name = "COUNT")]
    pub batch_size: Option<usize>,

    /// Classification requests in flight at once
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Also print the grammar word to stdout
    #[arg(long)]
    pub print: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .sentitree.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref input) = self.input {
            if !input.is_file() {
                return Err(format!("Input file does not exist: {}", input.display()));
            }
            if InputFormat::from_path(input).is_none() {
                return Err(format!(
                    "Unsupported input format (expected .csv or .json): {}",
                    input.display()
                ));
            }
        }

        if let Some(ref cached) = self.from_hierarchy {
            if !cached.is_file() {
                return Err(format!(
                    "Hierarchy file does not exist: {}",
                    cached.display()
                ));
            }
        }

        if let Some(factor) = self.contrast {
            if !factor.is_finite() || factor <= 0.0 {
                return Err("Contrast factor must be greater than 0".to_string());
            }
        }

        if self.batch_size == Some(0) {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            input: None,
            output: None,
            config: None,
            hierarchy_out: None,
            from_hierarchy: None,
            bucket_freq: None,
            contrast: None,
            first_branch: None,
            classify: false,
            model: None,
            ollama_url: None,
            batch_size: None,
            concurrency: None,
            print: false,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "sentitree",
            "--input",
            "chat.csv",
            "--bucket-freq",
            "W-MON",
            "--contrast",
            "2.5",
            "--first-branch",
            "left",
        ])
        .unwrap();

        assert_eq!(args.input, Some(PathBuf::from("chat.csv")));
        assert_eq!(args.bucket_freq, Some("W-MON".parse().unwrap()));
        assert_eq!(args.contrast, Some(2.5));
        assert_eq!(args.first_branch, Some(Direction::Left));
    }

    #[test]
    fn test_input_required_unless_cached_or_init() {
        assert!(Args::try_parse_from(["sentitree"]).is_err());
        assert!(Args::try_parse_from(["sentitree", "--init-config"]).is_ok());
        assert!(Args::try_parse_from(["sentitree", "--from-hierarchy", "tree.json"]).is_ok());
        assert!(Args::try_parse_from([
            "sentitree",
            "--from-hierarchy",
            "tree.json",
            "--input",
            "chat.csv"
        ])
        .is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_contrast_must_be_positive() {
        let mut args = make_args();
        args.contrast = Some(0.0);
        assert!(args.validate().is_err());
        args.contrast = Some(-2.0);
        assert!(args.validate().is_err());
        args.contrast = Some(2.0);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_missing_input_file() {
        let mut args = make_args();
        args.input = Some(PathBuf::from("/definitely/not/here.csv"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.xlsx");
        std::fs::write(&path, "").unwrap();

        let mut args = make_args();
        args.input = Some(path);
        assert!(args.validate().unwrap_err().contains("Unsupported input format"));
    }

    #[test]
    fn test_validation_batch_and_url() {
        let mut args = make_args();
        args.batch_size = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.ollama_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
