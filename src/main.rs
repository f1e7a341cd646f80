use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use igac_pipeline::config::PipelineConfig;
use igac_pipeline::pipeline::ingestion::dataset_info;
use igac_pipeline::pipeline::Pipeline;
use igac_pipeline::{logging, metrics};

#[derive(Parser)]
#[command(name = "igac_pipeline")]
#[command(about = "Standardization and anomaly detection over IGAC real-estate transactions")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full batch: standardize, score, classify and write outputs
    Run {
        /// Transaction CSV file
        #[arg(long)]
        input: PathBuf,
        /// TOML configuration (defaults to IGAC_PIPELINE_CONFIG or config/pipeline.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output directory (overrides [output].dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load and clean the input, then print the data quality report
    QualityReport {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print basic facts about an input file
    Info {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(p) => PipelineConfig::load(p)
            .with_context(|| format!("failed to load configuration from {}", p.display())),
        None => PipelineConfig::load_default().context("failed to load configuration"),
    }
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            config,
            output,
        } => {
            metrics::init_metrics();
            let config = load_config(config.as_deref())?;
            let output_dir = output.unwrap_or_else(|| PathBuf::from(&config.output.dir));

            println!("🚀 Running batch over {}", input.display());
            let pipeline = Pipeline::new(config);
            let summary = match pipeline.run(&input, &output_dir) {
                Ok(summary) => summary,
                Err(e) => {
                    error!("Batch run failed: {}", e);
                    return Err(e)
                        .with_context(|| format!("batch run over {} failed", input.display()));
                }
            };

            println!("\n📊 Run {}:", summary.run_id);
            println!("   Rows read: {}", summary.counts.rows_read);
            println!("   Standardized: {}", summary.counts.standardized);
            println!("   Duplicates dropped: {}", summary.counts.duplicates);
            println!("   Rejected: {}", summary.counts.rejected);
            println!("   Flagged records: {}", summary.counts.flagged_records);
            for (kind, n) in &summary.counts.flags_by_kind {
                println!("     {}: {}", kind, n);
            }
            println!("   Quality: {:?}", summary.quality.assessment.decision);
            println!("   Duration: {:.2}s", summary.duration_secs);
            println!("   Output: {}", output_dir.display());
        }
        Commands::QualityReport { input, config } => {
            let config = load_config(config.as_deref())?;
            let report = Pipeline::new(config)
                .quality_report(&input)
                .with_context(|| format!("quality pass over {} failed", input.display()))?;
            println!("{}", report);
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            let index = config.price_index()?;
            info!("Configuration is valid");
            println!("✅ Configuration is valid");
            println!(
                "   Price index: {} years, base year {}",
                index.years().count(),
                index.base_year()
            );
            println!("   Model threshold: {:?}", config.model.threshold);
            println!("   Missing index policy: {:?}", config.standardize.missing_index_policy);
        }
        Commands::Info { input, config } => {
            let config = load_config(config.as_deref())?;
            let info = dataset_info(&input, config.input.delimiter)
                .with_context(|| format!("failed to read {}", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }
    Ok(())
}
