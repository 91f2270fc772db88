//! Backend adapters.
//!
//! A backend adapter receives one prepared batch with its table identity
//! and persists it. Both variants convert every backend failure into a
//! [`SinkError`] at this boundary; nothing below the controller sees a
//! raw backend exception.

pub mod clickhouse;
pub mod lake;
pub mod parquet;
pub mod warehouse;

use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::SinkError;
use crate::route::TableId;

pub use lake::{LakeSink, WriteMode};
pub use warehouse::{SchemaCache, WarehouseSink};

/// A pluggable analytical storage backend.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Persist one batch into the named table.
    ///
    /// The batch is consumed regardless of outcome; a failed upload is
    /// reported, logged by the caller, and never retried within the run.
    async fn upload(&self, batch: Batch, id: &TableId) -> Result<(), SinkError>;
}
