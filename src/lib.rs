//! graupel: A library for ingesting wearable-device CSV exports.
//!
//! This library provides components for walking per-participant export
//! folders, normalizing and de-identifying CSV batches, and loading them
//! into a Delta Lake table layout or a ClickHouse warehouse.
//!
//! # Example
//!
//! ```ignore
//! use graupel::{Config, RunOptions, run_ingest, error::RunError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RunError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let report = run_ingest(config, RunOptions::default()).await?;
//!     println!("Uploaded {} files", report.files_uploaded);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod route;
pub mod schema;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;
pub mod whitelist;

// Re-export main types
pub use batch::{Batch, ColumnData};
pub use config::Config;
pub use pipeline::{Pipeline, RunOptions, RunReport, run_ingest};
pub use route::TableId;
pub use whitelist::Whitelist;
