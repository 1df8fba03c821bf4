// ============================================================================
// COMMAND LINE INTERFACE
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use metrics_etl::config::EtlConfig;
use metrics_etl::engine::build_transform_registry;
use metrics_etl::error::{EtlError, EtlResult};
use metrics_etl::logging::init_logging;
use metrics_etl::transform::BUILTIN_TRANSFORMS;
use metrics_etl::{Engine, ENGINE_FULL_NAME, ENGINE_NAME, ENGINE_VERSION};

// ----------------------------------------------------------------------------
// 12.1 CLI Argument Parser
// ----------------------------------------------------------------------------

/// Metrics ETL CLI
#[derive(Parser, Debug)]
#[command(
    name = "metrics-etl",
    author = "AIOps Team",
    version,
    about = "Scheduled extract/transform/load runner for monitoring time series",
    long_about = "Periodically extracts series from monitoring backends, runs them \
                  through configurable transform chains and loads the resulting \
                  metrics and alerts into destination systems."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "metrics-etl.toml", env = "METRICS_ETL_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "METRICS_ETL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, env = "METRICS_ETL_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine (default)
    Run,

    /// Run a single cycle and print its outcome as JSON
    Once,

    /// Validate configuration file and compose the engine
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List registered transform identifiers
    Transforms,

    /// Show engine version and build info
    Version,
}

// ----------------------------------------------------------------------------
// 12.2 CLI Handler Functions
// ----------------------------------------------------------------------------

/// Handle the validate subcommand
fn handle_validate(config_path: &Path, verbose: bool) -> EtlResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    let config = match EtlConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("❌ Configuration validation failed!");
            println!("Error: {}", e);
            return Err(EtlError::Config(e));
        }
    };

    // Composition catches unknown transforms and duplicate identifiers.
    let engine = match Engine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            println!("❌ Engine composition failed!");
            println!("Error: {}", e);
            return Err(e);
        }
    };
    println!("✅ Configuration is valid!");

    let config = engine.config();
    if verbose {
        println!("\n📋 Parsed configuration:");
        println!("{}", "=".repeat(60));
        match toml::to_string_pretty(config) {
            Ok(s) => println!("{}", s),
            Err(e) => println!("Failed to serialize: {}", e),
        }
    }

    println!("\n📊 Configuration Summary:");
    println!("  • Instance name: {}", config.engine.instance_name);
    println!("  • Interval: {}ms", config.engine.interval_ms);
    println!("  • Cycle timeout: {}ms", config.engine.cycle_timeout_ms);
    println!("  • Concurrency: {}", config.engine.effective_concurrency());
    println!("  • Sources: {}", engine.connectors().source_names().join(", "));
    println!("  • Destinations: {}", engine.connectors().destination_names().join(", "));
    println!("  • Tasks defined: {}", config.tasks.len());
    for task in &config.tasks {
        let chain: Vec<&str> = task.chain().iter().map(|t| t.as_str()).collect();
        println!(
            "    - {} ({} inputs → [{}] → {} destinations)",
            task.id(),
            task.inputs().len(),
            chain.join(", "),
            task.destinations().len()
        );
    }

    Ok(())
}

/// Handle the generate-config subcommand
fn handle_generate_config(output: Option<&Path>) -> EtlResult<()> {
    let config_str = EtlConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => {
            println!("{}", config_str);
        }
    }

    Ok(())
}

/// Handle the transforms subcommand
fn handle_transforms(config: &EtlConfig) -> EtlResult<()> {
    let registry = build_transform_registry(config)?;

    println!("Registered transforms:");
    for id in registry.ids() {
        let origin = if BUILTIN_TRANSFORMS.contains(&id.as_str()) {
            "built-in".to_string()
        } else {
            match registry.lookup(id.as_str()) {
                Ok(transform) => format!("configured, {}", transform.name()),
                Err(_) => "configured".to_string(),
            }
        };
        println!("  • {} ({})", id, origin);
    }
    Ok(())
}

/// Handle the version subcommand
fn handle_version() {
    println!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Binary: {}", ENGINE_NAME);
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!("  • Family: {}", std::env::consts::FAMILY);
    println!();
    println!("Sources: graphite, static");
    println!("Destinations: log, webhook");
    println!("Transforms: {}", BUILTIN_TRANSFORMS.join(", "));
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need a running engine
    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Some(Commands::Validate { verbose }) => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        _ => {}
    }

    let config_found = cli.config.exists();
    let config = if config_found {
        EtlConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        EtlConfig::default()
    };

    if let Some(Commands::Transforms) = &cli.command {
        handle_transforms(&config)?;
        return Ok(());
    }

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }

    // Held for the lifetime of the process so buffered file logs get flushed.
    let _log_guard = init_logging(&logging_config).context("Failed to initialize logging")?;

    if !config_found {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }

    let engine = Engine::from_config(config).context("Failed to compose engine")?;

    match cli.command {
        Some(Commands::Once) => {
            let outcome = engine.run_once().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_success() {
                bail!(
                    "cycle {} finished {} with {} failed task(s)",
                    outcome.cycle_id,
                    outcome.status,
                    outcome.failed_tasks().count() + outcome.timed_out.len()
                );
            }
        }
        Some(Commands::Run) | None => {
            info!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
            engine.run().await?;
        }
        Some(Commands::Version)
        | Some(Commands::GenerateConfig { .. })
        | Some(Commands::Validate { .. })
        | Some(Commands::Transforms) => {}
    }

    Ok(())
}
