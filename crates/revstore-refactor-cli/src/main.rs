//! revstore-refactor CLI - migration-script runner.

use clap::{Parser, Subcommand};
use revstore_refactor::{EngineConfig, MigrationError, MigrationRunner};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "revstore-refactor")]
#[command(about = "Structural migrations for a revision-versioned object store")]
#[command(version)]
struct Cli {
    /// Path to the YAML migration configuration
    #[arg(short, long, default_value = "migration.yaml")]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration script
    Run {
        /// Print the run report as JSON to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Load and validate the configuration without touching the store
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), MigrationError> {
    let cli = Cli::parse();
    init_logging(&cli.verbosity, &cli.log_format);

    match cli.command {
        Commands::Validate => {
            let config = EngineConfig::load(&cli.config)?;
            info!(
                "Configuration is valid: {} step(s), {} table(s).",
                config.script.processors.len(),
                config.schema.table_names().len()
            );
            Ok(())
        }
        Commands::Run { output_json } => {
            let config = EngineConfig::load(&cli.config)?;
            let pool = revstore_refactor::store::connect(&config.store).await?;
            let runner = MigrationRunner::new(pool, config.schema, config.model);
            let report = runner.run(&config.script).await?;
            if output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if report.succeeded() {
                Ok(())
            } else {
                Err(MigrationError::Config(format!(
                    "{} of {} step(s) failed; see log for details",
                    report.failed,
                    report.steps.len()
                )))
            }
        }
    }
}

fn init_logging(verbosity: &str, format: &str) {
    let filter = EnvFilter::try_new(verbosity)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
