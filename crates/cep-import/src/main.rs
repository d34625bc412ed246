//! CEP Import - eDNE bulk loader

use anyhow::{Context, Result};
use cep_common::format_count;
use cep_common::logging::{init_logging, LogConfig, LogLevel};
use cep_import::catalog::DatasetCatalog;
use cep_import::config::ImportConfig;
use cep_import::orchestrator::{ImportOptions, ImportOrchestrator};
use cep_import::progress::{ConsoleProgress, NoopProgress, ProgressObserver};
use cep_import::sink::{DiscardSink, PgStore};
use cep_import::{db, lookup, schema};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cep-import")]
#[command(author, version, about = "Bulk importer for the Correios eDNE postal base")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not draw progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and import every dataset (default)
    Import(ImportArgs),

    /// Parse every dataset without touching the database
    Validate(SourceArgs),

    /// List the dataset catalog
    Datasets,

    /// Look up a CEP in the imported tables
    Lookup {
        /// CEP, with or without punctuation
        cep: String,

        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
struct SourceArgs {
    /// Directory holding the eDNE text files
    #[arg(short, long)]
    base_path: Option<PathBuf>,

    /// Only import these datasets (id, file name or pattern); repeatable
    #[arg(short, long = "dataset")]
    datasets: Vec<String>,

    /// Rows per bulk insert
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Args, Debug, Default)]
struct ImportArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// eDNE release label stored with the report, e.g. 2411
    #[arg(long)]
    dataset_version: Option<String>,

    /// Free-form note stored with the report
    #[arg(long)]
    notes: Option<String>,

    /// Assume the schema already exists
    #[arg(long)]
    skip_schema: bool,

    /// Do not store the audit record
    #[arg(long)]
    no_report: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .log_file_prefix("cep-import")
        .build();

    let log_config = with_log_env(log_config);
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: logging disabled: {e:#}");
    }

    if let Err(e) = execute(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Environment variables take precedence over flags. A malformed variable
/// is reported and the flag-derived config is kept.
fn with_log_env(config: LogConfig) -> LogConfig {
    match config.clone().apply_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring logging environment: {e:#}");
            config
        },
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let show_progress = !cli.no_progress;

    match cli.command.unwrap_or(Command::Import(ImportArgs::default())) {
        Command::Import(args) => import(args, show_progress).await,
        Command::Validate(args) => validate(args, show_progress).await,
        Command::Datasets => {
            list_datasets();
            Ok(())
        },
        Command::Lookup { cep, database_url } => {
            let mut config = ImportConfig::load()?;
            if let Some(url) = database_url {
                config.database.url = url;
            }
            let pool = db::create_pool(&config.database).await?;
            let addresses = lookup::lookup_cep(&pool, &config.database.schema, &cep).await?;
            println!("{}", serde_json::to_string_pretty(&addresses)?);
            Ok(())
        },
    }
}

fn load_config(source: &SourceArgs) -> Result<(ImportConfig, DatasetCatalog)> {
    let mut config = ImportConfig::load().context("Invalid configuration")?;
    if let Some(base_path) = &source.base_path {
        config.base_path = base_path.clone();
    }
    if let Some(batch_size) = source.batch_size {
        config.batch_size = batch_size;
    }
    config.validate()?;

    let catalog = if source.datasets.is_empty() {
        DatasetCatalog::standard()
    } else {
        DatasetCatalog::standard().select(&source.datasets)?
    };
    Ok((config, catalog))
}

fn observer(show_progress: bool) -> Arc<dyn ProgressObserver> {
    if show_progress {
        Arc::new(ConsoleProgress::new())
    } else {
        Arc::new(NoopProgress)
    }
}

/// Cancels the token on Ctrl-C so workers stop at the next line.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping workers");
            signal_token.cancel();
        }
    });
    token
}

async fn import(args: ImportArgs, show_progress: bool) -> Result<()> {
    let (mut config, catalog) = load_config(&args.source)?;
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if args.dataset_version.is_some() {
        config.dataset_version = args.dataset_version;
    }
    if args.notes.is_some() {
        config.notes = args.notes;
    }
    if args.no_report {
        config.persist_report = false;
    }

    let pool = db::create_pool(&config.database).await?;
    db::health_check(&pool).await?;
    let version = db::server_version(&pool).await?;
    info!(server = %version, "Connected to database");

    if !args.skip_schema {
        schema::create_schema(&pool, &config.database.schema, &catalog).await?;
    }

    let store = Arc::new(PgStore::new(pool, config.database.schema.clone()));
    let orchestrator = ImportOrchestrator::new(catalog, store.clone(), ImportOptions::from(&config))
        .with_cancellation(cancel_on_ctrl_c())
        .with_observer(observer(show_progress && !args.json));

    let report = orchestrator.run(store.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

async fn validate(args: SourceArgs, show_progress: bool) -> Result<()> {
    let (config, catalog) = load_config(&args)?;
    let sink = Arc::new(DiscardSink::new());

    let orchestrator = ImportOrchestrator::new(catalog, sink.clone(), ImportOptions::from(&config))
        .with_cancellation(cancel_on_ctrl_c())
        .with_observer(observer(show_progress));

    let outcome = orchestrator.execute().await;
    if let Some(e) = outcome.first_error {
        return Err(e.into());
    }

    println!(
        "{} datasets valid: {} lines, {} rows",
        outcome.datasets.len(),
        format_count(outcome.total_lines),
        format_count(sink.rows())
    );
    Ok(())
}

fn list_datasets() {
    for dataset in DatasetCatalog::standard().iter() {
        println!(
            "{:<22} {:<26} {:<22} {:<7} {} columns (min {})",
            dataset.id,
            dataset.source.as_str(),
            dataset.table,
            dataset.conflict.as_str(),
            dataset.max_fields(),
            dataset.min_fields()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_malformed_log_env_keeps_flags() {
        std::env::set_var("LOG_LEVEL", "loudest");
        let config = with_log_env(LogConfig::builder().level(LogLevel::Debug).build());
        std::env::remove_var("LOG_LEVEL");

        assert_eq!(config.level, LogLevel::Debug);
    }

    #[test]
    #[serial]
    fn test_log_env_overrides_flags() {
        std::env::set_var("LOG_LEVEL", "warn");
        let config = with_log_env(LogConfig::builder().level(LogLevel::Debug).build());
        std::env::remove_var("LOG_LEVEL");

        assert_eq!(config.level, LogLevel::Warn);
    }
}
