//! Lake backend adapter.
//!
//! Writes each batch as an immutable Parquet file into a partitioned
//! layout under `{base_location}/{table_name}/`, partitioned by `pid`,
//! and registers the file in the `{database}.{table_name}` Delta Lake
//! table. Repeated uploads of the same data append; an explicit
//! overwrite mode recreates a table the first time it is touched in a
//! run.

use async_trait::async_trait;
use deltalake::DeltaTable;
use deltalake::arrow::datatypes::Schema;
use deltalake::kernel::Action;
use deltalake::operations::create::CreateBuilder;
use deltalake::protocol::SaveMode;
use object_store::path::Path;
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::BackendAdapter;
use super::parquet;
use crate::batch::Batch;
use crate::error::{DeltaLakeSnafu, LakeError, LakeStorageSnafu, SinkError, UrlParseSnafu};
use crate::route::TableId;
use crate::storage::{StorageProvider, StorageProviderRef};

/// Write disposition for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Append to existing tables (the default).
    #[default]
    Append,
    /// Recreate each table the first time it is written this run.
    Overwrite,
}

/// Lake sink writing Parquet files registered in Delta Lake tables.
pub struct LakeSink {
    storage: StorageProviderRef,
    database: String,
    mode: WriteMode,
    /// Tables already recreated this run under overwrite mode.
    recreated: Mutex<HashSet<String>>,
}

impl LakeSink {
    /// Create a lake sink rooted at the given base location.
    pub async fn new(
        base_location: &str,
        database: &str,
        mode: WriteMode,
        storage_options: HashMap<String, String>,
    ) -> Result<Self, LakeError> {
        // Register Delta Lake handlers for S3-backed tables
        deltalake::aws::register_handlers(None);

        let storage = StorageProvider::for_url_with_options(base_location, storage_options)
            .await
            .context(LakeStorageSnafu)?;

        Ok(Self {
            storage: StorageProviderRef::new(storage),
            database: database.to_string(),
            mode,
            recreated: Mutex::new(HashSet::new()),
        })
    }

    async fn upload_inner(&self, batch: Batch, id: &TableId) -> Result<(), LakeError> {
        let mut table = self.open_or_create_table(&batch, &id.table).await?;

        let filename = format!("pid={}/part-{}.parquet", id.pid, Uuid::now_v7());
        let bytes = parquet::encode(&batch, &["pid"])?;
        let size = bytes.len();

        self.storage
            .put(&Path::from(format!("{}/{}", id.table, filename)), bytes)
            .await
            .context(LakeStorageSnafu)?;

        let add = create_add_action(&filename, size, id.pid);
        let version = commit_to_delta(&mut table, vec![add]).await?;

        info!(
            "Committed {} rows to {}.{} at version {}",
            batch.num_rows(),
            self.database,
            id.table,
            version
        );

        Ok(())
    }

    /// Load the table for this upload, creating (or under overwrite mode
    /// recreating) it when needed.
    async fn open_or_create_table(
        &self,
        batch: &Batch,
        table_name: &str,
    ) -> Result<DeltaTable, LakeError> {
        let table_url = self.storage.url_for(table_name);
        let schema = parquet::arrow_schema(batch, &[]);

        let recreate = self.mode == WriteMode::Overwrite && {
            let mut recreated = self.recreated.lock().expect("recreated set poisoned");
            recreated.insert(table_name.to_string())
        };

        if recreate {
            info!("Overwrite mode: recreating table {table_url}");
            return self.create_table(&table_url, &schema, SaveMode::Overwrite).await;
        }

        let parsed_url = Url::parse(&table_url).context(UrlParseSnafu)?;
        match deltalake::open_table_with_storage_options(
            parsed_url,
            self.storage.storage_options().clone(),
        )
        .await
        {
            Ok(table) => {
                debug!(
                    "Loaded existing Delta table {} at version {}",
                    table_url,
                    table.version().unwrap_or(-1)
                );
                Ok(table)
            }
            Err(_) => {
                info!("Creating new Delta table at {table_url}");
                self.create_table(&table_url, &schema, SaveMode::ErrorIfExists)
                    .await
            }
        }
    }

    async fn create_table(
        &self,
        table_url: &str,
        schema: &Schema,
        save_mode: SaveMode,
    ) -> Result<DeltaTable, LakeError> {
        let delta_schema = arrow_schema_to_delta(schema)?;

        CreateBuilder::new()
            .with_location(table_url)
            .with_columns(delta_schema.fields().cloned())
            .with_partition_columns(["pid"])
            .with_save_mode(save_mode)
            .with_storage_options(self.storage.storage_options().clone())
            .await
            .context(DeltaLakeSnafu)
    }
}

#[async_trait]
impl BackendAdapter for LakeSink {
    async fn upload(&self, batch: Batch, id: &TableId) -> Result<(), SinkError> {
        self.upload_inner(batch, id)
            .await
            .map_err(|e| SinkError::LakeWrite {
                table: id.table.clone(),
                message: e.to_string(),
            })
    }
}

/// Convert an Arrow schema to a Delta schema.
fn arrow_schema_to_delta(schema: &Schema) -> Result<deltalake::kernel::StructType, LakeError> {
    use deltalake::arrow::datatypes::DataType as ArrowType;
    use deltalake::kernel::{DataType as DeltaType, StructField, StructType};

    let fields: Vec<StructField> = schema
        .fields()
        .iter()
        .map(|field| {
            let delta_type = match field.data_type() {
                ArrowType::Int64 => DeltaType::LONG,
                ArrowType::Float64 => DeltaType::DOUBLE,
                ArrowType::Timestamp(_, _) => DeltaType::TIMESTAMP,
                _ => DeltaType::STRING,
            };
            StructField::new(field.name(), delta_type, field.is_nullable())
        })
        .collect();

    StructType::try_new(fields).map_err(|e| {
        crate::error::StructTypeSnafu {
            message: e.to_string(),
        }
        .build()
    })
}

/// Create a Delta Lake Add action for an uploaded file.
fn create_add_action(filename: &str, size: usize, pid: u32) -> Action {
    use deltalake::kernel::Add;

    let partition_values: HashMap<String, Option<String>> =
        HashMap::from([("pid".to_string(), Some(pid.to_string()))]);

    Action::Add(Add {
        path: filename.trim_start_matches('/').to_string(),
        size: size as i64,
        partition_values,
        modification_time: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0),
        data_change: true,
        ..Default::default()
    })
}

/// Commit add actions to the Delta table.
async fn commit_to_delta(table: &mut DeltaTable, actions: Vec<Action>) -> Result<i64, LakeError> {
    use deltalake::kernel::transaction::CommitBuilder;

    let version = CommitBuilder::default()
        .with_actions(actions)
        .build(
            Some(table.snapshot().context(DeltaLakeSnafu)?),
            table.log_store(),
            deltalake::protocol::DeltaOperation::Write {
                mode: SaveMode::Append,
                partition_by: Some(vec!["pid".to_string()]),
                predicate: None,
            },
        )
        .await
        .context(DeltaLakeSnafu)?
        .version;

    Ok(version)
}
