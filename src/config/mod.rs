//! Run configuration.
//!
//! Handles loading configuration from YAML files with environment
//! variable interpolation, and validating that the selected backend has
//! everything it needs before any ingestion begins.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyLakePathSnafu, EmptyRootSnafu, EnvInterpolationSnafu,
    MissingCredentialSnafu, MissingLakeSectionSnafu, MissingWarehouseSectionSnafu, ReadFileSnafu,
    YamlParseSnafu,
};
use crate::sink::clickhouse::ClickHouseOptions;

/// Environment variable gating real uploads.
pub const ENV_TOGGLE: &str = "GRAUPEL_ENV";

/// True when `GRAUPEL_ENV` is set to `production`.
///
/// Any other value (or no value) selects dry-run mode: the pipeline runs
/// but nothing is uploaded.
pub fn production_mode() -> bool {
    std::env::var(ENV_TOGGLE).is_ok_and(|v| v == "production")
}

/// Main configuration structure for an ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory containing one folder per participant.
    pub root: String,

    /// Path to the table whitelist file.
    #[serde(default = "default_whitelist_path")]
    pub whitelist: String,

    /// Which backend receives the ingested batches.
    pub backend: BackendKind,

    /// Lake backend settings (required when `backend` is `lake`).
    #[serde(default)]
    pub lake: Option<LakeConfig>,

    /// Warehouse backend settings (required when `backend` is `warehouse`).
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,
}

fn default_whitelist_path() -> String {
    "whitelist.txt".to_string()
}

/// Backend selection switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Parquet files registered in Delta Lake tables.
    Lake,
    /// ClickHouse over its HTTP interface.
    Warehouse,
}

/// Lake backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LakeConfig {
    /// Base storage location, e.g. `s3://bucket/wearables` or a local path.
    pub path: String,

    /// Logical database name for catalog identities.
    #[serde(default = "default_database")]
    pub database: String,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Warehouse backend configuration.
///
/// The password usually arrives via interpolation, e.g.
/// `password: ${GRAUPEL_WAREHOUSE_PASSWORD}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_warehouse_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Table consulted for already-ingested participant ids in update mode.
    #[serde(default = "default_master_table")]
    pub master_table: String,

    /// Bound on every warehouse call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_database() -> String {
    "wearables".to_string()
}

fn default_warehouse_port() -> u16 {
    8123
}

fn default_master_table() -> String {
    "temp".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl WarehouseConfig {
    /// Connection settings for the ClickHouse client.
    pub fn client_options(&self) -> ClickHouseOptions {
        ClickHouseOptions {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment
    /// variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = if interpolate_env {
            let result = vars::interpolate(&content);
            if !result.is_ok() {
                let message = result.errors.join("\n");
                return EnvInterpolationSnafu { message }.fail();
            }
            result.text
        } else {
            content
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Backend credentials are checked here so a misconfigured run aborts
    /// before any folder is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.root.is_empty(), EmptyRootSnafu);

        match self.backend {
            BackendKind::Lake => {
                let lake = self.lake.as_ref().context(MissingLakeSectionSnafu)?;
                ensure!(!lake.path.is_empty(), EmptyLakePathSnafu);
            }
            BackendKind::Warehouse => {
                let warehouse = self.warehouse.as_ref().context(MissingWarehouseSectionSnafu)?;
                for (field, value) in [
                    ("host", &warehouse.host),
                    ("user", &warehouse.user),
                    ("password", &warehouse.password),
                    ("database", &warehouse.database),
                ] {
                    ensure!(!value.is_empty(), MissingCredentialSnafu { field });
                }
            }
        }

        Ok(())
    }
}
