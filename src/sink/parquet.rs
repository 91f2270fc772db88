//! Parquet encoding for lake uploads.
//!
//! Converts a typed [`Batch`] to an Arrow RecordBatch and writes it as a
//! single Snappy-compressed Parquet file in memory. Partition columns are
//! excluded from the file body; their values live in the partition path
//! and the Delta log.

use bytes::Bytes;
use deltalake::arrow::array::{
    ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
};
use deltalake::arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use deltalake::parquet::arrow::ArrowWriter;
use deltalake::parquet::basic::Compression;
use deltalake::parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::sync::Arc;

use crate::batch::{Batch, ColumnData};
use crate::error::{ArrowSnafu, LakeError, ParquetWriteSnafu};

/// Build the Arrow schema for a batch, excluding the named columns.
pub fn arrow_schema(batch: &Batch, exclude: &[&str]) -> Arc<Schema> {
    let fields: Vec<Field> = batch
        .columns()
        .iter()
        .filter(|col| !exclude.contains(&col.name.as_str()))
        .map(|col| {
            let data_type = match &col.data {
                ColumnData::Int64(_) => DataType::Int64,
                ColumnData::Float64(_) => DataType::Float64,
                ColumnData::Timestamp(_) => {
                    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
                }
                ColumnData::Utf8(_) => DataType::Utf8,
            };
            Field::new(&col.name, data_type, true)
        })
        .collect();

    Arc::new(Schema::new(fields))
}

/// Convert a batch to an Arrow RecordBatch, excluding the named columns.
pub fn to_record_batch(batch: &Batch, exclude: &[&str]) -> Result<RecordBatch, LakeError> {
    let schema = arrow_schema(batch, exclude);

    let arrays: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .filter(|col| !exclude.contains(&col.name.as_str()))
        .map(|col| -> ArrayRef {
            match &col.data {
                ColumnData::Int64(v) => Arc::new(Int64Array::from(v.clone())),
                ColumnData::Float64(v) => Arc::new(Float64Array::from(v.clone())),
                ColumnData::Timestamp(v) => {
                    let micros: Vec<Option<i64>> = v
                        .iter()
                        .map(|t| t.as_ref().map(|dt| dt.timestamp_micros()))
                        .collect();
                    Arc::new(TimestampMicrosecondArray::from(micros).with_timezone("UTC"))
                }
                ColumnData::Utf8(v) => Arc::new(StringArray::from(v.clone())),
            }
        })
        .collect();

    RecordBatch::try_new(schema, arrays).context(ArrowSnafu)
}

/// Encode a batch as Parquet bytes, excluding the named columns.
pub fn encode(batch: &Batch, exclude: &[&str]) -> Result<Bytes, LakeError> {
    let record = to_record_batch(batch, exclude)?;

    let properties = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, record.schema(), Some(properties))
        .context(ParquetWriteSnafu)?;
    writer.write(&record).context(ParquetWriteSnafu)?;
    writer.close().context(ParquetWriteSnafu)?;

    Ok(Bytes::from(buffer))
}
