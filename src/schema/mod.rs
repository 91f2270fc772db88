//! Table schema files and warehouse DDL.
//!
//! A schema file describes one table: the physical sort order and a list
//! of per-column descriptors with suggested warehouse types. Schema files
//! are produced by the `infer-schema` tool and consumed by
//! `create-tables`, which renders them into `CREATE TABLE` statements.

pub mod infer;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;
use std::path::Path;
use tracing::{error, info, warn};

use crate::error::{
    DdlSnafu, ReadDirSnafu, ReadSchemaFileSnafu, SchemaError, SchemaJsonSnafu,
};
use crate::sink::clickhouse::Warehouse;

/// One table's schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Column names for the physical sort/partition ordering. The
    /// participant id column always comes first, followed by the first
    /// detected temporal column, if any.
    #[serde(default)]
    pub orderby: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

/// One column descriptor in a schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field_name: String,
    pub example_values: Vec<String>,
    pub has_nulls: bool,
    pub null_percentage: f64,
    pub suggested_type: String,
    pub default: Option<Value>,
}

/// Read a schema file, accepting both the current object format and the
/// older bare field list.
pub fn read_schema_file(path: &Path) -> Result<TableSchema, SchemaError> {
    let display_path = path.display().to_string();
    let content = std::fs::read_to_string(path).context(ReadSchemaFileSnafu {
        path: display_path.clone(),
    })?;

    if let Ok(schema) = serde_json::from_str::<TableSchema>(&content) {
        return Ok(schema);
    }

    let fields: Vec<FieldSpec> =
        serde_json::from_str(&content).context(SchemaJsonSnafu { path: display_path })?;
    Ok(TableSchema {
        orderby: Vec::new(),
        fields,
    })
}

/// Render the `CREATE TABLE` statement for a schema.
pub fn create_table_sql(table: &str, schema: &TableSchema, database: &str) -> String {
    let fields: Vec<String> = schema
        .fields
        .iter()
        .map(|field| {
            let mut definition = format!("    `{}` {}", field.field_name, field.suggested_type);
            if let Some(clause) = default_clause(field.default.as_ref()) {
                definition.push_str(&clause);
            }
            definition
        })
        .collect();

    let order_by = if schema.orderby.is_empty() {
        "ORDER BY tuple()".to_string()
    } else {
        let columns: Vec<String> = schema.orderby.iter().map(|c| format!("`{c}`")).collect();
        format!("ORDER BY ({})", columns.join(", "))
    };

    format!(
        "CREATE TABLE IF NOT EXISTS {database}.{table}\n(\n{}\n)\nENGINE = MergeTree()\n{order_by}",
        fields.join(",\n")
    )
}

/// Render the optional `DEFAULT` clause for a field.
///
/// The `'-inf'` sentinel on float columns becomes a negative-infinity
/// literal; any other string default becomes the empty string; integer
/// defaults are rendered literally.
fn default_clause(default: Option<&Value>) -> Option<String> {
    match default? {
        Value::String(s) if s == "-inf" => Some(" DEFAULT -inf".to_string()),
        Value::String(_) => Some(" DEFAULT ''".to_string()),
        Value::Number(n) if n.is_i64() => Some(format!(" DEFAULT {n}")),
        _ => None,
    }
}

/// Outcome of a `create-tables` run.
#[derive(Debug, Default)]
pub struct CreateReport {
    pub created: usize,
    pub failed: usize,
}

/// Create warehouse tables from every `*_schema.json` file in a folder.
///
/// A failure to create one table is logged and counted; the remaining
/// schema files are still processed.
pub async fn create_tables(
    schema_dir: &Path,
    client: &dyn Warehouse,
    database: &str,
) -> Result<CreateReport, SchemaError> {
    client
        .execute(&format!("CREATE DATABASE IF NOT EXISTS {database}"))
        .await
        .context(DdlSnafu)?;
    info!("Database '{database}' ready");

    let mut entries: Vec<_> = std::fs::read_dir(schema_dir)
        .context(ReadDirSnafu {
            path: schema_dir.display().to_string(),
        })?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with("_schema.json"))
        })
        .collect();
    entries.sort();

    if entries.is_empty() {
        warn!("No schema files found in {}", schema_dir.display());
        return Ok(CreateReport::default());
    }

    let mut report = CreateReport::default();
    for path in entries {
        let table = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.trim_end_matches("_schema.json").to_string(),
            None => continue,
        };

        let schema = match read_schema_file(&path) {
            Ok(schema) => schema,
            Err(e) => {
                error!("Failed to read schema for '{table}': {e}");
                report.failed += 1;
                continue;
            }
        };

        let sql = create_table_sql(&table, &schema, database);
        info!("Creating table '{table}' ({} fields)", schema.fields.len());

        match client.execute(&sql).await {
            Ok(()) => {
                info!("Table '{table}' created");
                report.created += 1;
            }
            Err(e) => {
                error!("Failed to create table '{table}': {e}");
                report.failed += 1;
            }
        }
    }

    info!(
        "Table creation complete: {} created, {} failed",
        report.created, report.failed
    );
    Ok(report)
}
