//! Error types for graupel using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. Everything below the controller
//! converts backend failures into per-file results; only the fatal
//! configuration/environment conditions in [`RunError`] abort a run.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during object storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Root directory is empty.
    #[snafu(display("Root directory cannot be empty"))]
    EmptyRoot,

    /// Lake backend selected but no lake section present.
    #[snafu(display("Backend is 'lake' but the config has no lake section"))]
    MissingLakeSection,

    /// Warehouse backend selected but no warehouse section present.
    #[snafu(display("Backend is 'warehouse' but the config has no warehouse section"))]
    MissingWarehouseSection,

    /// Lake base path is empty.
    #[snafu(display("Lake path cannot be empty"))]
    EmptyLakePath,

    /// A required warehouse credential is missing or empty.
    #[snafu(display("Warehouse credential '{field}' is missing or empty"))]
    MissingCredential { field: String },
}

// ============ Whitelist Errors ============

/// Errors that can occur while loading the table whitelist.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WhitelistError {
    /// The whitelist file could not be read. Fatal before any ingestion.
    #[snafu(display("Cannot read whitelist file {path}"))]
    Read {
        path: String,
        source: std::io::Error,
    },
}

// ============ CSV Errors ============

/// Errors that can occur while parsing a source CSV file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix is intentional to avoid snafu selector conflicts (e.g., ReadSnafu)
pub enum CsvError {
    /// Failed to read or parse the CSV file.
    #[snafu(display("Failed to read {path}"))]
    CsvRead { path: String, source: csv::Error },
}

// ============ Coercion Error ============

/// A batch column could not be coerced to a timestamp type.
///
/// Carries the first value that failed conversion so the operator can
/// locate the offending file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("Unable to convert column '{column}' to timestamp, sample value that failed conversion: {sample:?}"))]
pub struct CoerceError {
    pub column: String,
    pub sample: String,
}

// ============ Transform Errors ============

/// Errors raised by per-table transforms. Always file-local.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// A column the transform requires is not present in the batch.
    #[snafu(display("Batch is missing required column '{column}'"))]
    MissingColumn { column: String },

    /// Timestamp conversion failed.
    #[snafu(display("Timestamp conversion failed"))]
    Timestamp { source: CoerceError },
}

// ============ Warehouse Client Errors ============

/// Errors from the warehouse HTTP client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// The HTTP request itself failed (connection, timeout).
    #[snafu(display("Warehouse request failed"))]
    Http { source: reqwest::Error },

    /// The warehouse returned a non-success status.
    #[snafu(display("Warehouse query failed (HTTP {status}): {message}"))]
    Query { status: u16, message: String },

    /// The warehouse response could not be decoded.
    #[snafu(display("Failed to decode warehouse response: {message}"))]
    Decode { message: String },
}

impl ClientError {
    /// Check if this error indicates the queried table does not exist.
    pub fn is_unknown_table(&self) -> bool {
        match self {
            ClientError::Query { message, .. } => {
                message.contains("UNKNOWN_TABLE") || message.contains("Code: 60")
            }
            _ => false,
        }
    }
}

// ============ Lake Errors ============

/// Errors that can occur inside the lake sink. Converted to a
/// [`SinkError`] at the upload boundary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LakeError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    LakeStorage { source: StorageError },

    /// Parquet write error.
    #[snafu(display("Parquet write error"))]
    ParquetWrite {
        source: deltalake::parquet::errors::ParquetError,
    },

    /// Arrow batch construction failed.
    #[snafu(display("Arrow conversion failed"))]
    Arrow {
        source: deltalake::arrow::error::ArrowError,
    },

    /// Delta Lake operation failed.
    #[snafu(display("Delta Lake operation failed"))]
    DeltaLake { source: deltalake::DeltaTableError },

    /// Failed to parse table URL.
    #[snafu(display("Failed to parse URL"))]
    UrlParse { source: url::ParseError },

    /// Failed to create struct type.
    #[snafu(display("Failed to create struct type: {message}"))]
    StructType { message: String },
}

// ============ Sink Errors ============

/// Per-file upload failures reported by a backend adapter.
///
/// Adapters never propagate backend exceptions raw; every failure is
/// converted to one of these variants with a descriptive message.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The destination table does not exist in the warehouse.
    #[snafu(display("Table '{table}' not found in warehouse: {message}"))]
    TableMissing { table: String, message: String },

    /// A schema column is absent from the batch.
    #[snafu(display("Table '{table}': schema column '{column}' is absent from the batch"))]
    SchemaMismatch { table: String, column: String },

    /// A schema-driven timestamp coercion failed.
    #[snafu(display("Table '{table}': {source}"))]
    SinkTimestamp { table: String, source: CoerceError },

    /// The warehouse rejected the operation.
    #[snafu(display("Table '{table}': warehouse error"))]
    Warehouse { table: String, source: ClientError },

    /// The lake backend rejected the write.
    #[snafu(display("Table '{table}': {message}"))]
    LakeWrite { table: String, message: String },
}

// ============ Schema Tool Errors ============

/// Errors from the schema inference and table creation tools.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchemaError {
    /// Failed to list a directory.
    #[snafu(display("Failed to read directory {path}"))]
    ReadDir {
        path: String,
        source: std::io::Error,
    },

    /// Failed to read a schema or CSV file.
    #[snafu(display("Failed to read {path}"))]
    ReadSchemaFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to write a schema file.
    #[snafu(display("Failed to write {path}"))]
    WriteSchemaFile {
        path: String,
        source: std::io::Error,
    },

    /// Schema JSON could not be parsed.
    #[snafu(display("Failed to parse schema JSON {path}"))]
    SchemaJson {
        path: String,
        source: serde_json::Error,
    },

    /// DDL execution failed at a level that aborts table creation.
    #[snafu(display("DDL execution failed"))]
    Ddl { source: ClientError },
}

// ============ Run Error (top-level) ============

/// Top-level errors that abort a run.
///
/// These are configuration/environment problems that make further work
/// meaningless; everything else is handled per file or per PID.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Whitelist could not be loaded.
    #[snafu(display("Whitelist error"))]
    Whitelist { source: WhitelistError },

    /// The root directory does not exist or is not a directory.
    #[snafu(display("{path} must be a directory path"))]
    RootMissing { path: String },

    /// Directory enumeration failed while walking participant folders.
    #[snafu(display("Failed to read directory {path}"))]
    WalkDir {
        path: String,
        source: std::io::Error,
    },

    /// Update mode requested for a backend that cannot resolve PIDs.
    #[snafu(display("Update mode is only supported with the warehouse backend"))]
    UpdateRequiresWarehouse,

    /// The master table used for update-mode PID resolution is missing.
    #[snafu(display("Master table '{table}' not found during update-mode PID resolution"))]
    MasterLookup { table: String, source: ClientError },

    /// Lake backend could not be initialized.
    #[snafu(display("Lake backend initialization failed"))]
    LakeInit { source: LakeError },

    /// Schema tool error.
    #[snafu(display("Schema tool error"))]
    Schema { source: SchemaError },

    /// Fatal warehouse client error outside the per-file path.
    #[snafu(display("Warehouse client error"))]
    Client { source: ClientError },
}
