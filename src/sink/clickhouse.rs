//! ClickHouse HTTP client.
//!
//! Thin wrapper over the ClickHouse HTTP interface. The [`Warehouse`]
//! trait is the seam the warehouse sink and the controller depend on, so
//! tests can substitute a recording stub for a live server.

use async_trait::async_trait;
use serde::Deserialize;
use snafu::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{ClientError, HttpSnafu, QuerySnafu};

/// One column of a warehouse table, as reported by `DESCRIBE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub type_name: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// True for DateTime/Date columns, including Nullable wrappers.
    pub fn is_temporal(&self) -> bool {
        self.type_name.contains("DateTime") || self.type_name.contains("Date")
    }

    /// True for String columns, including Nullable/LowCardinality wrappers.
    pub fn is_string(&self) -> bool {
        self.type_name.contains("String")
    }
}

/// Live warehouse operations used by the sink and the controller.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Fetch the column layout of a table.
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnSpec>, ClientError>;

    /// Insert newline-delimited JSON rows into a table.
    async fn insert_rows(&self, table: &str, rows: String) -> Result<(), ClientError>;

    /// Distinct participant ids present in a table.
    async fn distinct_pids(&self, table: &str) -> Result<BTreeSet<u32>, ClientError>;

    /// Execute a statement with no result, e.g. DDL.
    async fn execute(&self, sql: &str) -> Result<(), ClientError>;
}

/// Connection settings for [`ClickHouseClient`].
#[derive(Debug, Clone)]
pub struct ClickHouseOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub timeout_secs: u64,
}

/// ClickHouse client over the HTTP interface.
///
/// Long-lived for the duration of a run; every request carries a bounded
/// timeout so a stuck backend fails one file rather than hanging the run.
pub struct ClickHouseClient {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
    database: String,
}

impl ClickHouseClient {
    pub fn new(options: &ClickHouseOptions) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .context(HttpSnafu)?;

        Ok(Self {
            http,
            endpoint: format!("http://{}:{}/", options.host, options.port),
            user: options.user.clone(),
            password: options.password.clone(),
            database: options.database.clone(),
        })
    }

    /// Run one statement, returning the raw response body.
    async fn query(&self, sql: &str, body: String) -> Result<String, ClientError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("database", self.database.as_str()), ("query", sql)])
            .basic_auth(&self.user, Some(&self.password))
            .body(body)
            .send()
            .await
            .context(HttpSnafu)?;

        let status = response.status();
        let text = response.text().await.context(HttpSnafu)?;

        ensure!(
            status.is_success(),
            QuerySnafu {
                status: status.as_u16(),
                message: text.trim().to_string(),
            }
        );

        Ok(text)
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", self.database, table)
    }
}

#[derive(Debug, Deserialize)]
struct DescribeRow {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Deserialize)]
struct PidRow {
    pid: u32,
}

#[async_trait]
impl Warehouse for ClickHouseClient {
    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnSpec>, ClientError> {
        let sql = format!("DESCRIBE TABLE {} FORMAT JSONEachRow", self.qualified(table));
        let body = self.query(&sql, String::new()).await?;

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<DescribeRow>(line)
                    .map(|row| ColumnSpec::new(row.name, row.type_name))
                    .map_err(|e| ClientError::Decode {
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    async fn insert_rows(&self, table: &str, rows: String) -> Result<(), ClientError> {
        let sql = format!("INSERT INTO {} FORMAT JSONEachRow", self.qualified(table));
        self.query(&sql, rows).await?;
        Ok(())
    }

    async fn distinct_pids(&self, table: &str) -> Result<BTreeSet<u32>, ClientError> {
        let sql = format!(
            "SELECT DISTINCT pid FROM {} FORMAT JSONEachRow",
            self.qualified(table)
        );
        let body = self.query(&sql, String::new()).await?;

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<PidRow>(line)
                    .map(|row| row.pid)
                    .map_err(|e| ClientError::Decode {
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    async fn execute(&self, sql: &str) -> Result<(), ClientError> {
        self.query(sql, String::new()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_spec_temporal_detection() {
        assert!(ColumnSpec::new("t", "DateTime").is_temporal());
        assert!(ColumnSpec::new("t", "Nullable(DateTime)").is_temporal());
        assert!(ColumnSpec::new("t", "Date").is_temporal());
        assert!(!ColumnSpec::new("t", "Int32").is_temporal());
        assert!(!ColumnSpec::new("t", "String").is_temporal());
    }

    #[test]
    fn test_column_spec_string_detection() {
        assert!(ColumnSpec::new("s", "String").is_string());
        assert!(ColumnSpec::new("s", "Nullable(String)").is_string());
        assert!(ColumnSpec::new("s", "LowCardinality(String)").is_string());
        assert!(!ColumnSpec::new("s", "Float64").is_string());
    }
}
