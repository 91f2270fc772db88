//! Table whitelist.
//!
//! The ingestor only processes tables named in a sidecar text file,
//! one name per line. A missing file is fatal before any ingestion
//! begins; an unlisted table is an expected, silent skip.

use snafu::prelude::*;
use std::path::Path;

use crate::error::{ReadSnafu, WhitelistError};

/// The set of table names eligible for ingestion, in file order.
#[derive(Debug, Clone)]
pub struct Whitelist {
    tables: Vec<String>,
}

impl Whitelist {
    /// Load the whitelist from a text file.
    ///
    /// Lines are trimmed; blank lines are ignored. Order is preserved and
    /// duplicates are allowed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WhitelistError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadSnafu {
            path: path.display().to_string(),
        })?;

        let tables = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self { tables })
    }

    /// Build a whitelist from table names directly (used in tests).
    pub fn from_tables(tables: Vec<String>) -> Self {
        Self { tables }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}
