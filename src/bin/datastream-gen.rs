// Data Stream Generator - CLI
// Single entry point for streaming and batch generation runs

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use datastream_gen::config::{
    ArSeries, ArmaSeries, DriverRef, Environment, ExportTransform, GeneratorConfig, RunConfig,
    RunMode, SeriesCommon, SeriesConfig,
};
use datastream_gen::progress::SetupSpinner;
use datastream_gen::runner::Orchestrator;
use datastream_gen::validation;

#[derive(Parser)]
#[command(name = "datastream-gen")]
#[command(version = "0.2.0")]
#[command(about = "Multivariate data stream generator", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a generation run
    Run {
        /// One or more TOML configuration files; the first generator
        /// section wins, series definitions accumulate
        #[arg(required = true)]
        configs: Vec<String>,
    },

    /// Check configuration files without generating anything
    Validate {
        /// TOML configuration files to check
        #[arg(required = true)]
        configs: Vec<String>,
    },

    /// Write an example configuration
    Init {
        /// Target path for the example file
        #[arg(default_value = "datastream.toml")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    std::env::set_var("RUST_LOG", log_level);
    tracing_subscriber::fmt::init();

    info!("🚀 Data Stream Generator v0.2.0");

    match cli.command {
        Commands::Run { configs } => {
            let config = load_config_or_exit(&configs);
            let spinner = SetupSpinner::new("Setting up series generators...");
            let mut orchestrator = match Orchestrator::setup(config).await {
                Ok(orchestrator) => {
                    spinner.finish("Setup complete");
                    orchestrator
                }
                Err(e) => {
                    spinner.finish_with_error(&format!("Setup failed: {}", e));
                    return Err(e.into());
                }
            };
            orchestrator.run().await?;
        }

        Commands::Validate { configs } => {
            let config = load_config_or_exit(&configs);
            validation::pre_flight(&config)?;
            info!(
                "✅ Configuration is valid: {} series, mode {:?}",
                config.series.len(),
                config.generator.mode
            );
        }

        Commands::Init { path } => {
            init_config(&path)?;
        }
    }

    Ok(())
}

/// Load and merge config files or exit with a helpful error message
fn load_config_or_exit(paths: &[String]) -> RunConfig {
    for path in paths {
        info!("📁 Config: {}", path);
    }
    match RunConfig::load_files(paths) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration Error");
            error!("{}", e);
            error!("");
            error!("💡 Quick fix:");
            error!("   1. Run: datastream-gen init");
            error!("   2. Edit datastream.toml");
            error!("   3. Try again");
            std::process::exit(1);
        }
    }
}

fn init_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if std::path::Path::new(path).exists() {
        warn!("⚠️  {} already exists, skipping", path);
        return Ok(());
    }

    info!("🔧 Writing example configuration to {}", path);
    example_config().to_file(path)?;

    info!("✅ Example configuration written!");
    info!("💡 Next steps:");
    info!("   1. Edit {}", path);
    info!("   2. Run: datastream-gen validate {}", path);
    info!("   3. Run: datastream-gen run {}", path);

    Ok(())
}

/// A small batch run: one AR base series and one ARMA series driven by it.
fn example_config() -> RunConfig {
    let base = SeriesConfig::Ar(ArSeries {
        common: SeriesCommon {
            id: "x1".to_string(),
            export: true,
            delay: 10,
            rank: 1,
            title: "base signal".to_string(),
            topic: "series/x1".to_string(),
            interval: None,
            outlier_ratio_1s: 0.05,
            outlier_ratio_2s: 0.01,
            drivers: Vec::new(),
        },
        c: 1.0,
        mean: 0.0,
        std_dev: 0.5,
        p: vec![0.6, 0.2],
    });

    let coupled = SeriesConfig::Arma(ArmaSeries {
        common: SeriesCommon {
            id: "x2".to_string(),
            export: true,
            delay: 10,
            rank: 2,
            title: "coupled signal".to_string(),
            topic: "series/x2".to_string(),
            interval: None,
            outlier_ratio_1s: 0.0,
            outlier_ratio_2s: 0.0,
            drivers: vec![DriverRef {
                id: "x1".to_string(),
                p: Some(vec![0.3]),
                q: None,
            }],
        },
        c: 0.5,
        mean: 0.0,
        std_dev: 0.25,
        p: vec![0.4],
        q: vec![0.3],
    });

    RunConfig {
        generator: GeneratorConfig {
            id: "example".to_string(),
            description: Some("two coupled autoregressive series".to_string()),
            environment: Environment::Development,
            mode: RunMode::GenerateTimed,
            seed: 42,
            shuffle: false,
            interval: 100,
            duration: 60_000,
            date_time_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
            start_date_time: None,
            decimal_precision: 4,
            broker_url: None,
            output_file_path: Some("datastream.csv".to_string()),
            separator: ";".to_string(),
            export_id_as_header: true,
            export_date_time: true,
            export_event_count: true,
            export_lags: Vec::new(),
            export_transform: ExportTransform::Raw,
        },
        series: vec![base, coupled],
    }
}
