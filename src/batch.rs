//! In-memory tabular batch.
//!
//! One [`Batch`] is built from a single source CSV file and consumed by a
//! single upload attempt. Columns are strongly typed and column-oriented,
//! so transforms and adapters can check column presence and coerce types
//! without round-tripping through strings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::CoerceError;

/// Columnar data for one batch column.
///
/// Null cells are represented as `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
    Utf8(Vec<Option<String>>),
}

impl ColumnData {
    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name for log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnData::Int64(_) => "int64",
            ColumnData::Float64(_) => "float64",
            ColumnData::Timestamp(_) => "timestamp",
            ColumnData::Utf8(_) => "utf8",
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Result of coercing a column to the timestamp type.
#[derive(Debug, Clone)]
pub struct TimestampCoercion {
    /// True if the source values carried explicit UTC offsets.
    pub tz_aware: bool,
    /// Per-row UTC offset in minutes. `Some(0)` for values without an
    /// explicit offset (treated as UTC), `None` for null rows. Empty when
    /// the column was already a timestamp or absent.
    pub offsets: Vec<Option<i64>>,
}

impl TimestampCoercion {
    fn noop() -> Self {
        Self {
            tz_aware: false,
            offsets: Vec::new(),
        }
    }
}

/// An ordered set of named columns with a uniform row count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
    rows: usize,
}

impl Batch {
    /// Create an empty batch with a fixed row count.
    pub fn new(rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            rows,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Ordered column views.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Ordered column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Append a column. The column must match the batch row count.
    pub fn push_column(&mut self, name: impl Into<String>, data: ColumnData) {
        assert_eq!(data.len(), self.rows, "column length must match row count");
        self.columns.push(Column {
            name: name.into(),
            data,
        });
    }

    /// Append or replace a column by name.
    pub fn set_column(&mut self, name: &str, data: ColumnData) {
        assert_eq!(data.len(), self.rows, "column length must match row count");
        match self.column_mut(name) {
            Some(col) => col.data = data,
            None => self.push_column(name, data),
        }
    }

    /// Append a constant-filled Int64 column.
    pub fn push_int64_constant(&mut self, name: impl Into<String>, value: i64) {
        let data = ColumnData::Int64(vec![Some(value); self.rows]);
        self.push_column(name, data);
    }

    /// Remove a column by name. Returns true if it was present.
    pub fn drop_column(&mut self, name: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|c| c.name != name);
        self.columns.len() != before
    }

    /// Rename a column. Returns true if it was present.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.column_mut(from) {
            Some(col) => {
                col.name = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Coerce a column to the timestamp type, normalizing to UTC.
    ///
    /// String columns are parsed row by row; the first unconvertible value
    /// fails the whole coercion with that sample value in the error.
    /// Columns that are already timestamps, or absent, are a no-op.
    pub fn coerce_timestamp(&mut self, name: &str) -> Result<TimestampCoercion, CoerceError> {
        let Some(col) = self.column_mut(name) else {
            return Ok(TimestampCoercion::noop());
        };

        match &col.data {
            ColumnData::Timestamp(_) => Ok(TimestampCoercion::noop()),
            ColumnData::Utf8(values) => {
                let mut parsed = Vec::with_capacity(values.len());
                let mut offsets = Vec::with_capacity(values.len());
                let mut tz_aware = false;

                for value in values {
                    match value {
                        None => {
                            parsed.push(None);
                            offsets.push(None);
                        }
                        Some(s) => match parse_timestamp(s) {
                            Some((utc, offset)) => {
                                parsed.push(Some(utc));
                                if offset.is_some() {
                                    tz_aware = true;
                                }
                                offsets.push(Some(offset.unwrap_or(0)));
                            }
                            None => {
                                return Err(CoerceError {
                                    column: name.to_string(),
                                    sample: s.clone(),
                                });
                            }
                        },
                    }
                }

                col.data = ColumnData::Timestamp(parsed);
                Ok(TimestampCoercion { tz_aware, offsets })
            }
            other => {
                let sample = match other {
                    ColumnData::Int64(v) => v.iter().flatten().next().map(|n| n.to_string()),
                    ColumnData::Float64(v) => v.iter().flatten().next().map(|n| n.to_string()),
                    _ => None,
                };
                Err(CoerceError {
                    column: name.to_string(),
                    sample: sample.unwrap_or_default(),
                })
            }
        }
    }

    /// Replace nulls in a string column with the empty string.
    ///
    /// Non-string columns are left untouched.
    pub fn fill_string_nulls(&mut self, name: &str) {
        if let Some(col) = self.column_mut(name) {
            if let ColumnData::Utf8(values) = &mut col.data {
                for value in values {
                    if value.is_none() {
                        *value = Some(String::new());
                    }
                }
            }
        }
    }
}

/// Parse a timestamp string, returning the UTC instant and the explicit
/// UTC offset in minutes when the source carried one.
///
/// Accepted shapes: RFC 3339 / ISO-8601 with offset, naive
/// `YYYY-MM-DD HH:MM:SS[.frac]` (space or `T` separated, treated as UTC),
/// and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(s: &str) -> Option<(DateTime<Utc>, Option<i64>)> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let offset_minutes = i64::from(dt.offset().local_minus_utc()) / 60;
        return Some((dt.with_timezone(&Utc), Some(offset_minutes)));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some((naive.and_utc(), None));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some((naive.and_utc(), None));
    }

    None
}
