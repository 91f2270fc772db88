//! Warehouse backend adapter.
//!
//! Prepares each batch against the destination table's live schema and
//! inserts it over the ClickHouse HTTP interface. Table schemas are
//! memoized for the run in a [`SchemaCache`] owned by the sink, so a
//! table is described at most once no matter how many files feed it.

use async_trait::async_trait;
use serde_json::{Map, Number, Value, json};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::BackendAdapter;
use super::clickhouse::{ColumnSpec, Warehouse};
use crate::batch::{Batch, ColumnData};
use crate::error::{SchemaMismatchSnafu, SinkError, WarehouseSnafu};
use crate::route::TableId;

/// Per-run memoization of table column layouts.
///
/// Entries are populated lazily on first reference and never invalidated
/// within a run; a table altered mid-run will be seen stale. Under
/// concurrent use the first writer wins and later fetchers observe the
/// cached entry.
#[derive(Default)]
pub struct SchemaCache {
    inner: Mutex<HashMap<String, Arc<Vec<ColumnSpec>>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str) -> Option<Arc<Vec<ColumnSpec>>> {
        self.inner
            .lock()
            .expect("schema cache poisoned")
            .get(table)
            .cloned()
    }

    /// Store a fetched schema unless another fetcher got there first.
    /// Returns the entry that won.
    pub fn insert_if_absent(
        &self,
        table: &str,
        columns: Vec<ColumnSpec>,
    ) -> Arc<Vec<ColumnSpec>> {
        self.inner
            .lock()
            .expect("schema cache poisoned")
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(columns))
            .clone()
    }
}

/// Warehouse sink inserting batches into ClickHouse tables.
pub struct WarehouseSink {
    client: Arc<dyn Warehouse>,
    cache: SchemaCache,
}

impl WarehouseSink {
    pub fn new(client: Arc<dyn Warehouse>) -> Self {
        Self {
            client,
            cache: SchemaCache::new(),
        }
    }

    /// Look up the table schema, describing the table on first use.
    async fn schema_for(&self, table: &str) -> Result<Arc<Vec<ColumnSpec>>, SinkError> {
        if let Some(schema) = self.cache.get(table) {
            return Ok(schema);
        }

        debug!("Schema cache miss for {table}, querying table metadata");
        let columns = self
            .client
            .describe_table(table)
            .await
            .map_err(|e| {
                if e.is_unknown_table() {
                    SinkError::TableMissing {
                        table: table.to_string(),
                        message: e.to_string(),
                    }
                } else {
                    SinkError::Warehouse {
                        table: table.to_string(),
                        source: e,
                    }
                }
            })?;

        Ok(self.cache.insert_if_absent(table, columns))
    }
}

#[async_trait]
impl BackendAdapter for WarehouseSink {
    async fn upload(&self, mut batch: Batch, id: &TableId) -> Result<(), SinkError> {
        let schema = self.schema_for(&id.table).await?;

        prepare(&mut batch, &schema, &id.table)?;

        let rows = serialize_rows(&batch, &schema);
        if rows.is_empty() {
            debug!("Empty batch for table {}, nothing to insert", id.table);
            return Ok(());
        }

        self.client
            .insert_rows(&id.table, rows)
            .await
            .context(WarehouseSnafu {
                table: id.table.clone(),
            })
    }
}

/// Shape a batch to the destination schema.
///
/// Every schema column must be present in the batch. Temporal columns
/// are coerced to timestamps; when a coercion observes explicit UTC
/// offsets and the schema defines a `tzoffset` column, the recomputed
/// offsets overwrite any transform-stage value (each tz-aware temporal
/// column overwrites in turn). String columns get nulls replaced by the
/// empty string. A transform-stage `tzoffset` the schema does not know
/// is dropped so the insert cannot fail on an unknown column.
fn prepare(batch: &mut Batch, schema: &[ColumnSpec], table: &str) -> Result<(), SinkError> {
    let schema_has_tzoffset = schema.iter().any(|c| c.name == "tzoffset");
    if !schema_has_tzoffset && batch.drop_column("tzoffset") {
        debug!("Schema for {table} has no tzoffset column, dropping computed offsets");
    }

    let mut recomputed_offsets: Option<Vec<Option<i64>>> = None;

    for column in schema.iter().filter(|c| c.name != "tzoffset") {
        ensure!(
            batch.has_column(&column.name),
            SchemaMismatchSnafu {
                table,
                column: column.name.clone(),
            }
        );

        if column.is_temporal() {
            let coercion =
                batch
                    .coerce_timestamp(&column.name)
                    .map_err(|source| SinkError::SinkTimestamp {
                        table: table.to_string(),
                        source,
                    })?;
            if coercion.tz_aware {
                recomputed_offsets = Some(coercion.offsets);
            }
        } else if column.is_string() {
            batch.fill_string_nulls(&column.name);
        }
    }

    if schema_has_tzoffset {
        if let Some(offsets) = recomputed_offsets {
            batch.set_column("tzoffset", ColumnData::Int64(offsets));
        } else {
            ensure!(
                batch.has_column("tzoffset"),
                SchemaMismatchSnafu {
                    table,
                    column: "tzoffset",
                }
            );
        }
    }

    Ok(())
}

/// Serialize a batch as newline-delimited JSON rows in schema order.
fn serialize_rows(batch: &Batch, schema: &[ColumnSpec]) -> String {
    let mut lines = Vec::with_capacity(batch.num_rows());

    for row in 0..batch.num_rows() {
        let mut object = Map::new();
        for column in schema {
            let Some(col) = batch.column(&column.name) else {
                continue;
            };
            object.insert(column.name.clone(), cell_value(&col.data, row));
        }
        lines.push(Value::Object(object).to_string());
    }

    lines.join("\n")
}

fn cell_value(data: &ColumnData, row: usize) -> Value {
    match data {
        ColumnData::Int64(v) => v[row].map_or(Value::Null, |n| json!(n)),
        ColumnData::Float64(v) => v[row]
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),
        ColumnData::Timestamp(v) => v[row].map_or(Value::Null, |t| {
            Value::String(t.format("%Y-%m-%d %H:%M:%S").to_string())
        }),
        ColumnData::Utf8(v) => v[row]
            .as_ref()
            .map_or(Value::Null, |s| Value::String(s.clone())),
    }
}
