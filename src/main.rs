//! graupel: A standalone tool for ingesting wearable-device CSV exports.
//!
//! This tool walks a directory tree of per-participant export folders,
//! normalizes and de-identifies each file, and loads the result into a
//! Delta Lake table layout (S3 or local) or a ClickHouse warehouse.

mod batch;
mod config;
mod error;
mod pipeline;
mod route;
mod schema;
mod sink;
mod source;
mod storage;
mod transform;
mod whitelist;

use clap::{Parser, Subcommand};
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{ClientSnafu, ConfigError, ConfigSnafu, RunError, SchemaSnafu};
use pipeline::{RunOptions, run_ingest};
use sink::clickhouse::ClickHouseClient;

/// Wearable-device CSV export ingestion tool.
#[derive(Parser, Debug)]
#[command(name = "graupel")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest participant folders into the configured backend.
    Ingest {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,

        /// Restrict ingestion to one or more participant ids.
        #[arg(long = "pid")]
        pids: Vec<u32>,

        /// Ingest only participants not yet present in the master table.
        #[arg(long)]
        update: bool,

        /// Recreate lake tables instead of appending.
        #[arg(long)]
        overwrite: bool,
    },

    /// Infer table schema files from a folder of export CSVs.
    InferSchema {
        /// Folder containing export CSV files.
        #[arg(long)]
        csv_folder: PathBuf,

        /// Output directory for schema files.
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },

    /// Create warehouse tables from schema files.
    CreateTables {
        /// Path to the configuration file.
        #[arg(short, long)]
        config: PathBuf,

        /// Directory containing `*_schema.json` files.
        #[arg(long, default_value = "schemas")]
        schema_dir: PathBuf,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), RunError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("graupel starting");

    match args.command {
        Command::Ingest {
            config,
            pids,
            update,
            overwrite,
        } => {
            let config = Config::from_file(&config).context(ConfigSnafu)?;
            info!("Root: {}", config.root);
            info!("Whitelist: {}", config.whitelist);
            info!("Backend: {:?}", config.backend);

            let options = RunOptions {
                pids,
                update,
                overwrite,
            };
            let report = run_ingest(config, options).await?;

            info!("Ingestion complete");
            info!("  Files uploaded: {}", report.files_uploaded);
            info!("  Files failed: {}", report.files_failed);
            info!("  Files skipped: {}", report.files_skipped);
            if !report.pids_failed.is_empty() {
                warn!(
                    "  Failed participants: {:?}",
                    report.pids_failed.iter().collect::<Vec<_>>()
                );
            }
        }

        Command::InferSchema {
            csv_folder,
            out_dir,
        } => {
            let tables =
                schema::infer::infer_schemas(&csv_folder, &out_dir).context(SchemaSnafu)?;
            info!("Inferred schemas for {} tables", tables.len());
        }

        Command::CreateTables { config, schema_dir } => {
            let config = Config::from_file(&config).context(ConfigSnafu)?;
            let warehouse = config
                .warehouse
                .as_ref()
                .ok_or(ConfigError::MissingWarehouseSection)
                .context(ConfigSnafu)?;

            let client =
                ClickHouseClient::new(&warehouse.client_options()).context(ClientSnafu)?;
            let report = schema::create_tables(&schema_dir, &client, &warehouse.database)
                .await
                .context(SchemaSnafu)?;
            info!(
                "Table creation finished: {} created, {} failed",
                report.created, report.failed
            );
        }
    }

    Ok(())
}
