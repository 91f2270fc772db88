//! Schema inference from export CSV files.
//!
//! Scans a folder of CSVs, groups them by table name (the first
//! underscore-separated token of the file stem), and writes one
//! `<table>_schema.json` per table plus a human-readable text rendering.
//!
//! Inference runs over raw cell text rather than the typed batches the
//! ingestor builds, because the schema tool needs to see timezone
//! indicators that UTC normalization would erase.

use serde_json::json;
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::{FieldSpec, TableSchema};
use crate::batch::parse_timestamp;
use crate::error::{ReadDirSnafu, SchemaError, WriteSchemaFileSnafu};

/// Sentinel default for float columns, rendered as a negative-infinity
/// literal in DDL.
const FLOAT_DEFAULT: &str = "-inf";

/// Default for integer columns: the Int32 minimum.
const INT_DEFAULT: i64 = -2147483648;

/// Incremental per-column statistics over raw cell text.
struct ColumnStats {
    examples: Vec<String>,
    nulls: usize,
    total: usize,
    seen_non_null: bool,
    all_int: bool,
    all_float: bool,
    all_timestamp: bool,
    any_tz: bool,
}

impl ColumnStats {
    fn new() -> Self {
        Self {
            examples: Vec::new(),
            nulls: 0,
            total: 0,
            seen_non_null: false,
            all_int: true,
            all_float: true,
            all_timestamp: true,
            any_tz: false,
        }
    }

    fn observe(&mut self, cell: &str) {
        self.total += 1;

        if cell.is_empty() {
            self.nulls += 1;
            return;
        }

        self.seen_non_null = true;
        if self.examples.len() < 3 && !self.examples.iter().any(|e| e == cell) {
            self.examples.push(cell.to_string());
        }

        self.all_int &= cell.parse::<i64>().is_ok();
        self.all_float &= cell.parse::<f64>().is_ok();
        match parse_timestamp(cell) {
            Some((_, offset)) => {
                if offset.is_some() {
                    self.any_tz = true;
                }
            }
            None => self.all_timestamp = false,
        }
    }

    /// Base warehouse type before any Nullable wrapping.
    fn base_type(&self) -> &'static str {
        if !self.seen_non_null {
            return "Nullable(String)";
        }
        if self.all_int {
            // Integer widths in sensor exports are unpredictable, so every
            // integer column gets Int32; a value past the Int32 range will
            // fail the insert and can be widened then.
            return "Int32";
        }
        if self.all_float {
            return "Float64";
        }
        if self.all_timestamp {
            return "DateTime";
        }
        "String"
    }

    fn suggested_type(&self) -> String {
        let base = self.base_type();
        if self.nulls > 0 && !base.starts_with("Nullable") {
            format!("Nullable({base})")
        } else {
            base.to_string()
        }
    }

    fn default_value(&self) -> Option<serde_json::Value> {
        let suggested = self.suggested_type();
        if suggested.contains("String") {
            Some(json!(""))
        } else if suggested.contains("Int32") {
            Some(json!(INT_DEFAULT))
        } else if suggested.contains("Float64") {
            Some(json!(FLOAT_DEFAULT))
        } else {
            None
        }
    }

    fn null_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.nulls as f64 / self.total as f64 * 10_000.0).round() / 100.0
    }
}

/// Infer schemas for every table found in `csv_folder` and write them to
/// `out_dir`. Returns the table names processed.
pub fn infer_schemas(csv_folder: &Path, out_dir: &Path) -> Result<Vec<String>, SchemaError> {
    let csv_files = list_csv_files(csv_folder)?;
    if csv_files.is_empty() {
        warn!("No CSV files found in {}", csv_folder.display());
        return Ok(Vec::new());
    }
    info!("Found {} CSV files", csv_files.len());

    // Group files by table name, preserving discovery order.
    let mut tables: Vec<(String, Vec<PathBuf>)> = Vec::new();
    for path in csv_files {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(table) = stem.split('_').next().filter(|t| !t.is_empty()) else {
            warn!("Skipping {}: unexpected file name", path.display());
            continue;
        };
        let table = table.to_ascii_lowercase();
        match tables.iter_mut().find(|(name, _)| *name == table) {
            Some((_, files)) => files.push(path),
            None => tables.push((table, vec![path])),
        }
    }

    std::fs::create_dir_all(out_dir).context(WriteSchemaFileSnafu {
        path: out_dir.display().to_string(),
    })?;

    let mut processed = Vec::new();
    for (table, files) in tables {
        info!("Processing table: {table} ({} files)", files.len());
        let schema = infer_table_schema(&files);
        write_schema_files(out_dir, &table, &schema)?;
        processed.push(table);
    }

    info!("Schema generation complete");
    Ok(processed)
}

fn list_csv_files(folder: &Path) -> Result<Vec<PathBuf>, SchemaError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)
        .context(ReadDirSnafu {
            path: folder.display().to_string(),
        })?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Accumulate column statistics over every file of one table.
fn infer_table_schema(files: &[PathBuf]) -> TableSchema {
    let mut order: Vec<String> = Vec::new();
    let mut stats: HashMap<String, ColumnStats> = HashMap::new();

    for path in files {
        if let Err(e) = scan_file(path, &mut order, &mut stats) {
            error!("Error reading {}: {e}", path.display());
        }
    }

    let mut any_tz = false;
    let mut first_datetime: Option<String> = None;
    let mut fields = Vec::new();

    for name in &order {
        let column = &stats[name];
        if column.base_type() == "DateTime" {
            if column.any_tz {
                any_tz = true;
            }
            if first_datetime.is_none() {
                first_datetime = Some(name.clone());
            }
        }
        fields.push(FieldSpec {
            field_name: name.clone(),
            example_values: column.examples.clone(),
            has_nulls: column.nulls > 0,
            null_percentage: column.null_percentage(),
            suggested_type: column.suggested_type(),
            default: column.default_value(),
        });
    }

    // The participant id column is always appended.
    fields.push(FieldSpec {
        field_name: "pid".to_string(),
        example_values: vec!["1".to_string(), "2".to_string(), "100".to_string()],
        has_nulls: false,
        null_percentage: 0.0,
        suggested_type: "UInt16".to_string(),
        default: None,
    });

    if any_tz {
        warn!("Timezone-aware datetime fields detected, adding tzoffset column");
        fields.push(FieldSpec {
            field_name: "tzoffset".to_string(),
            example_values: vec!["0".to_string(), "+60".to_string(), "-300".to_string()],
            has_nulls: false,
            null_percentage: 0.0,
            suggested_type: "Int16".to_string(),
            default: None,
        });
    }

    let mut orderby = vec!["pid".to_string()];
    if let Some(datetime) = first_datetime {
        orderby.push(datetime);
    }

    TableSchema { orderby, fields }
}

fn scan_file(
    path: &Path,
    order: &mut Vec<String>,
    stats: &mut HashMap<String, ColumnStats>,
) -> Result<(), csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    for header in &headers {
        if !stats.contains_key(header) {
            order.push(header.clone());
            stats.insert(header.clone(), ColumnStats::new());
        }
    }

    let mut rows = 0;
    for record in reader.records() {
        let record = record?;
        rows += 1;
        for (header, cell) in headers.iter().zip(record.iter()) {
            if let Some(column) = stats.get_mut(header) {
                column.observe(cell);
            }
        }
    }

    info!("Read {}: {rows} rows, {} columns", path.display(), headers.len());
    Ok(())
}

fn write_schema_files(
    out_dir: &Path,
    table: &str,
    schema: &TableSchema,
) -> Result<(), SchemaError> {
    let json_path = out_dir.join(format!("{table}_schema.json"));
    let json = serde_json::to_string_pretty(schema).unwrap_or_default();
    std::fs::write(&json_path, json).context(WriteSchemaFileSnafu {
        path: json_path.display().to_string(),
    })?;
    info!("Schema written to {}", json_path.display());

    let text_path = out_dir.join(format!("{table}_schema.txt"));
    std::fs::write(&text_path, render_text(table, schema)).context(WriteSchemaFileSnafu {
        path: text_path.display().to_string(),
    })?;
    info!("Human-readable schema written to {}", text_path.display());

    Ok(())
}

fn render_text(table: &str, schema: &TableSchema) -> String {
    let mut out = String::new();
    out.push_str(&format!("Schema for table: {table}\n"));
    out.push_str(&format!("{}\n\n", "=".repeat(80)));
    out.push_str(&format!("ORDER BY: {}\n", schema.orderby.join(", ")));
    out.push_str(&format!("{}\n\n", "-".repeat(80)));

    for field in &schema.fields {
        out.push_str(&format!("Field: {}\n", field.field_name));
        out.push_str(&format!("  Type: {}\n", field.suggested_type));
        out.push_str(&format!(
            "  Has Nulls: {} ({}%)\n",
            field.has_nulls, field.null_percentage
        ));
        out.push_str(&format!("  Examples: {}\n", field.example_values.join(", ")));
        if let Some(default) = &field.default {
            out.push_str(&format!("  Default: {default}\n"));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer_from(content: &str) -> TableSchema {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("temp_1_export_1.csv");
        std::fs::write(&path, content).unwrap();
        infer_table_schema(&[path])
    }

    fn field<'a>(schema: &'a TableSchema, name: &str) -> &'a FieldSpec {
        schema
            .fields
            .iter()
            .find(|f| f.field_name == name)
            .unwrap_or_else(|| panic!("missing field {name}"))
    }

    #[test]
    fn test_infer_basic_types() {
        let schema = infer_from("count,score,note\n1,1.5,a\n2,2.5,b\n");

        assert_eq!(field(&schema, "count").suggested_type, "Int32");
        assert_eq!(field(&schema, "score").suggested_type, "Float64");
        assert_eq!(field(&schema, "note").suggested_type, "String");
        assert_eq!(field(&schema, "pid").suggested_type, "UInt16");
    }

    #[test]
    fn test_nullable_wrapping_and_defaults() {
        let schema = infer_from("score\n1.5\n\n");

        let score = field(&schema, "score");
        assert_eq!(score.suggested_type, "Nullable(Float64)");
        assert!(score.has_nulls);
        assert_eq!(score.null_percentage, 50.0);
        assert_eq!(score.default, Some(json!("-inf")));
    }

    #[test]
    fn test_tz_aware_column_adds_tzoffset() {
        let schema =
            infer_from("day_start\n2024-01-01T08:00:00-04:00\n2024-01-02T08:00:00-04:00\n");

        assert_eq!(field(&schema, "day_start").suggested_type, "DateTime");
        assert_eq!(field(&schema, "tzoffset").suggested_type, "Int16");
        assert_eq!(schema.orderby, vec!["pid", "day_start"]);
    }

    #[test]
    fn test_naive_datetime_has_no_tzoffset() {
        let schema = infer_from("taken_at\n2024-01-01 08:00:00\n");

        assert!(!schema.fields.iter().any(|f| f.field_name == "tzoffset"));
        assert_eq!(schema.orderby, vec!["pid", "taken_at"]);
    }

    #[test]
    fn test_orderby_without_datetime_is_pid_only() {
        let schema = infer_from("value\n1\n");
        assert_eq!(schema.orderby, vec!["pid"]);
    }

    #[test]
    fn test_infer_schemas_groups_by_table() {
        let csv_dir = tempfile::TempDir::new().unwrap();
        let out_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(csv_dir.path().join("temp_1_export_1.csv"), "v\n1\n").unwrap();
        std::fs::write(csv_dir.path().join("temp_1_export_2.csv"), "v\n2\n").unwrap();
        std::fs::write(csv_dir.path().join("sleep_1_export_1.csv"), "v\n3\n").unwrap();

        let tables = infer_schemas(csv_dir.path(), out_dir.path()).unwrap();

        assert_eq!(tables, vec!["sleep", "temp"]);
        assert!(out_dir.path().join("temp_schema.json").exists());
        assert!(out_dir.path().join("temp_schema.txt").exists());
        assert!(out_dir.path().join("sleep_schema.json").exists());
    }
}
