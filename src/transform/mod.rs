//! Per-table transforms and de-identification.
//!
//! Every batch gets a constant `pid` column before its per-table modifier
//! runs, and a uniform de-identification pass after. Modifiers are looked
//! up by table name in a [`Registry`]; tables without one pass through
//! unmodified.

use snafu::prelude::*;
use std::collections::HashMap;
use tracing::debug;

use crate::batch::{Batch, ColumnData};
use crate::error::{MissingColumnSnafu, TimestampSnafu, TransformError};

/// Columns overwritten by the de-identification pass.
const SENSITIVE_COLUMNS: [&str; 4] = ["email", "group", "name", "participant_id"];

/// Placeholder written over sensitive string values.
const STRING_PLACEHOLDER: &str = "REDACTED";

/// Placeholder written over sensitive numeric values.
const NUMERIC_PLACEHOLDER: i64 = 0;

/// A per-table batch modifier.
///
/// A transform failure rejects the batch; the caller logs it and moves on
/// to the next file. One file must never abort the run.
pub trait Transform: Send + Sync {
    fn apply(&self, batch: Batch) -> Result<Batch, TransformError>;
}

/// Registry of per-table modifiers keyed by table name.
pub struct Registry {
    modifiers: HashMap<&'static str, Box<dyn Transform>>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut modifiers: HashMap<&'static str, Box<dyn Transform>> = HashMap::new();
        modifiers.insert("temp", Box::new(Temperature));
        modifiers.insert("activity", Box::new(Activity));
        Self { modifiers }
    }
}

impl Registry {
    /// Apply the modifier registered for `table`, if any.
    pub fn apply(&self, table: &str, batch: Batch) -> Result<Batch, TransformError> {
        match self.modifiers.get(table) {
            Some(modifier) => modifier.apply(batch),
            None => Ok(batch),
        }
    }

    pub fn has_modifier(&self, table: &str) -> bool {
        self.modifiers.contains_key(table)
    }
}

/// Attach the constant `pid` column to a batch.
pub fn inject_pid(batch: &mut Batch, pid: u32) {
    batch.push_int64_constant("pid", i64::from(pid));
}

/// Overwrite sensitive columns in place with fixed placeholder values.
///
/// Columns are overwritten rather than dropped so downstream schemas stay
/// stable in shape across tables that do and do not carry them natively.
/// Absent columns are left absent. Idempotent.
pub fn deidentify(batch: &mut Batch) {
    for name in SENSITIVE_COLUMNS {
        let Some(col) = batch.column_mut(name) else {
            continue;
        };
        let rows = col.data.len();
        col.data = match &col.data {
            ColumnData::Utf8(_) => {
                ColumnData::Utf8(vec![Some(STRING_PLACEHOLDER.to_string()); rows])
            }
            ColumnData::Int64(_) => ColumnData::Int64(vec![Some(NUMERIC_PLACEHOLDER); rows]),
            ColumnData::Float64(_) => {
                ColumnData::Float64(vec![Some(NUMERIC_PLACEHOLDER as f64); rows])
            }
            ColumnData::Timestamp(_) => ColumnData::Timestamp(vec![None; rows]),
        };
    }
}

/// Modifier for the temperature table.
///
/// Drops the identifying columns outright and normalizes the reading
/// timestamp to UTC under an explicit name.
struct Temperature;

impl Transform for Temperature {
    fn apply(&self, mut batch: Batch) -> Result<Batch, TransformError> {
        for column in ["email", "group", "name", "participant_id"] {
            batch.drop_column(column);
        }

        ensure!(
            batch.has_column("timestamp"),
            MissingColumnSnafu {
                column: "timestamp"
            }
        );
        batch.coerce_timestamp("timestamp").context(TimestampSnafu)?;
        batch.rename_column("timestamp", "timestamp_utc");

        Ok(batch)
    }
}

/// Modifier for the activity table.
///
/// Extracts the per-row UTC offset from `day_start` before the summary
/// fields are normalized to UTC, then attaches it as `tzoffset` in
/// minutes. Rows whose `day_start` has no parseable offset get a null
/// offset; that never fails the batch.
struct Activity;

impl Transform for Activity {
    fn apply(&self, mut batch: Batch) -> Result<Batch, TransformError> {
        for column in ["summary_date", "day_start", "day_end"] {
            ensure!(batch.has_column(column), MissingColumnSnafu { column });
        }

        let offsets = extract_offsets(&batch);

        for column in ["summary_date", "day_start", "day_end"] {
            batch.coerce_timestamp(column).context(TimestampSnafu)?;
        }

        batch.rename_column("summary_date", "summary_date_utc");
        batch.rename_column("day_start", "day_start_utc");
        batch.rename_column("day_end", "day_end_utc");

        batch.set_column("tzoffset", ColumnData::Int64(offsets));

        Ok(batch)
    }
}

/// Per-row UTC offsets in minutes from the raw `day_start` strings.
fn extract_offsets(batch: &Batch) -> Vec<Option<i64>> {
    let Some(col) = batch.column("day_start") else {
        return vec![None; batch.num_rows()];
    };

    match &col.data {
        ColumnData::Utf8(values) => values
            .iter()
            .map(|value| {
                value.as_deref().and_then(|s| {
                    chrono::DateTime::parse_from_rfc3339(s.trim())
                        .ok()
                        .map(|dt| i64::from(dt.offset().local_minus_utc()) / 60)
                })
            })
            .collect(),
        other => {
            debug!(
                "day_start is {} rather than a string, no offsets to extract",
                other.type_name()
            );
            vec![None; batch.num_rows()]
        }
    }
}
