//! Sentitree - grow an L-system tree out of a chat history
//!
//! A CLI tool that aggregates sentiment-scored messages into weekly and
//! monthly buckets and writes the L-system word a renderer turns into a
//! tree: one trunk segment per month, one fruit per bucket.
//!
//! Exit codes:
//!   0 - Success (including an empty conversation, which gives an empty word)
//!   1 - Any error (bad input, config, classifier failure, I/O)

mod analysis;
mod classifier;
mod cli;
mod config;
mod error;
mod grammar;
mod ingest;
mod models;

use analysis::AggregationSettings;
use anyhow::{Context, Result};
use classifier::OllamaClassifier;
use cli::Args;
use config::{AggregationConfig, Config, DEFAULT_CONFIG_FILE};
use error::PipelineError;
use grammar::GrammarSettings;
use models::TreeHierarchy;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config decides verbosity, so it is read before logging starts
    let (mut config, config_source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, config.general.verbose);

    info!("Sentitree v{}", env!("CARGO_PKG_VERSION"));
    match config_source {
        Some(path) => info!("Loaded config from: {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(&args, &config).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .sentitree.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize bucketing, contrast, geometry, and the classifier.");
    Ok(())
}

/// Initialize logging based on verbosity settings; `RUST_LOG` wins when set.
fn init_logging(args: &Args, config_verbose: bool) {
    let level = if config_verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the whole pipeline and write the word.
async fn run(args: &Args, config: &Config) -> Result<()> {
    let start_time = Instant::now();

    // Step 1: Get the hierarchy, either cached or freshly aggregated
    let hierarchy = match args.from_hierarchy {
        Some(ref cached) => {
            println!("📂 Loading hierarchy: {}", cached.display());
            load_hierarchy(cached, &config.aggregation)?
        }
        None => {
            let input = args
                .input
                .as_ref()
                .context("No input file given (use --input or --from-hierarchy)")?;
            build_hierarchy(input, config, args.quiet).await?
        }
    };

    if hierarchy.months.is_empty() {
        warn!("No messages to aggregate; the word will be empty");
    }

    // Step 2: Cache the hierarchy if asked
    if let Some(ref path) = config.general.hierarchy_output {
        write_hierarchy(&hierarchy, path)?;
        println!("💾 Hierarchy saved to: {}", path.display());
    }

    // Step 3: Produce and check the word
    println!("\n🌱 Producing grammar word...");
    let grammar_settings = GrammarSettings::from(&config.grammar);
    grammar_settings.validate()?;
    let word = grammar::produce(&hierarchy, &grammar_settings);
    let stats = grammar::check_word(&word).map_err(PipelineError::from)?;
    debug!(
        "Word has {} trunk segments, {} steps, {} fruits, depth {}",
        stats.trunk_segments, stats.steps, stats.fruits, stats.max_depth
    );

    let output = &config.general.output;
    std::fs::write(output, &word)
        .with_context(|| format!("Failed to write word to {}", output.display()))?;

    if args.print {
        println!("\n{}", word);
    }

    // Print summary
    let duration = start_time.elapsed().as_secs_f64();
    println!("\n📊 Tree Summary:");
    println!("   Messages: {}", hierarchy.message_count());
    println!(
        "   Months: {} | Buckets: {}",
        hierarchy.total_months(),
        hierarchy.bucket_count()
    );
    println!("   Trunk height: {:.1}", hierarchy.trunk_height());
    println!("   Word length: {} chars", word.len());
    println!("   Duration: {:.1}s", duration);
    println!("\n✅ Done! Word saved to: {}", output.display());

    Ok(())
}

/// Read messages, score them, and aggregate.
async fn build_hierarchy(input: &Path, config: &Config, quiet: bool) -> Result<TreeHierarchy> {
    println!("📥 Reading messages: {}", input.display());
    let records = ingest::load_messages(input)?;
    info!("Read {} rows", records.len());

    let messages = if config.classifier.enabled {
        println!("🤖 Classifying sentiment...");
        println!("   Model: {}", config.classifier.model);
        println!("   Ollama: {}", config.classifier.ollama_url);
        println!(
            "   Batches: {} messages, {} in flight",
            config.classifier.batch_size, config.classifier.concurrency
        );

        let classifier = OllamaClassifier::new(config.classifier.clone())?;
        classifier::score_records(
            &classifier,
            records,
            config.classifier.batch_size,
            config.classifier.concurrency,
            !quiet,
        )
        .await?
    } else {
        ingest::into_scored(records)?
    };

    let settings = AggregationSettings::from(&config.aggregation);
    println!(
        "🧮 Aggregating {} messages ({} buckets, contrast {})...",
        messages.len(),
        settings.bucket_freq,
        settings.contrast_factor
    );
    let hierarchy = analysis::aggregate(&messages, &settings)?;

    Ok(hierarchy)
}

/// Load and re-check a cached hierarchy against the configured trunk bounds.
fn load_hierarchy(path: &Path, aggregation: &AggregationConfig) -> Result<TreeHierarchy> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hierarchy file: {}", path.display()))?;
    let hierarchy: TreeHierarchy = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse hierarchy file: {}", path.display()))?;

    hierarchy
        .validate(aggregation.min_trunk_height, aggregation.max_trunk_height)
        .with_context(|| format!("Hierarchy file is inconsistent: {}", path.display()))?;

    Ok(hierarchy)
}

fn write_hierarchy(hierarchy: &TreeHierarchy, path: &Path) -> Result<()> {
    let json =
        serde_json::to_string_pretty(hierarchy).context("Failed to serialize hierarchy")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write hierarchy to {}", path.display()))
}

/// Load configuration from file or use defaults.
///
/// An explicit `--config` must load; a broken default file only warns.
fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Ok((Config::load(config_path)?, Some(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, Some(PathBuf::from(DEFAULT_CONFIG_FILE)))),
        Ok(None) => Ok((Config::default(), None)),
        Err(e) => {
            eprintln!("⚠️  Failed to load config: {:#}", e);
            Ok((Config::default(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregate;
    use crate::models::ScoredMessage;
    use chrono::NaiveDate;

    #[test]
    fn test_hierarchy_file_round_trip_is_validated() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let messages = vec![ScoredMessage::with_score(ts, "yay".into(), true, 0.9)];
        let hierarchy = aggregate(&messages, &AggregationSettings::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        write_hierarchy(&hierarchy, &path).unwrap();

        let loaded = load_hierarchy(&path, &AggregationConfig::default()).unwrap();
        assert_eq!(loaded, hierarchy);

        // contrast(0.9, 2.0) has a full 17-digit mantissa; it must survive the file
        let original = hierarchy.months[0].weeks[0].avg_sentiment_contrasted;
        let cached = loaded.months[0].weeks[0].avg_sentiment_contrasted;
        assert_eq!(cached.to_bits(), original.to_bits());
        assert_eq!(
            grammar::produce(&loaded, &GrammarSettings::default()),
            grammar::produce(&hierarchy, &GrammarSettings::default())
        );

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"send_datetime\": \"2024-01-07\""));
        assert!(json.contains("\"month\": \"2024-01\""));
    }

    #[test]
    fn test_inconsistent_hierarchy_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        std::fs::write(
            &path,
            r#"{"meta": {"trunk_height": 40.0, "total_months": 2}, "months": []}"#,
        )
        .unwrap();

        let err = load_hierarchy(&path, &AggregationConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("total_months"));
    }

    #[test]
    fn test_cached_trunk_height_must_fit_configured_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        std::fs::write(
            &path,
            r#"{"meta": {"trunk_height": 120.0, "total_months": 0}, "months": []}"#,
        )
        .unwrap();

        let err = load_hierarchy(&path, &AggregationConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("trunk height 120 is outside [10, 40]"));

        let wide = AggregationConfig {
            max_trunk_height: 150.0,
            ..AggregationConfig::default()
        };
        assert!(load_hierarchy(&path, &wide).is_ok());
    }

    #[test]
    fn test_fixture_pipeline_without_classifier() {
        let input = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join("conversation.csv");
        let hierarchy =
            tokio_test::block_on(build_hierarchy(&input, &Config::default(), true)).unwrap();

        assert_eq!(hierarchy.total_months(), 3);
        assert_eq!(hierarchy.trunk_height(), 40.0);

        let word = grammar::produce(&hierarchy, &GrammarSettings::default());
        let stats = grammar::check_word(&word).unwrap();
        assert_eq!(stats.trunk_segments, 3);
        assert_eq!(stats.fruits, 7);
        assert!(word.starts_with("T(20)[+M(8)[+W(11.5)F("));
    }
}
