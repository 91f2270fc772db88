//! CSV source reading.
//!
//! Parses one export CSV into a typed [`Batch`], inferring a primitive
//! type per column from its values: integer, then float, then timestamp,
//! then string, the first type every non-null value fits. Timestamp
//! inference only applies to naive values; offset-bearing values are
//! kept as text so downstream coercion can still see the offset.

use snafu::prelude::*;
use std::path::Path;

use crate::batch::{Batch, ColumnData, parse_timestamp};
use crate::error::{CsvError, CsvReadSnafu};

/// Read a CSV file into a typed batch.
///
/// Empty cells become nulls. Rows must match the header width; ragged
/// rows fail the file.
pub fn read_csv(path: impl AsRef<Path>) -> Result<Batch, CsvError> {
    let path = path.as_ref();
    let display_path = path.display().to_string();

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .context(CsvReadSnafu {
            path: display_path.clone(),
        })?;

    let headers: Vec<String> = reader
        .headers()
        .context(CsvReadSnafu {
            path: display_path.clone(),
        })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.context(CsvReadSnafu {
            path: display_path.clone(),
        })?;
        for (i, field) in record.iter().enumerate() {
            if i < cells.len() {
                let value = if field.is_empty() {
                    None
                } else {
                    Some(field.to_string())
                };
                cells[i].push(value);
            }
        }
    }

    let rows = cells.first().map(Vec::len).unwrap_or(0);
    let mut batch = Batch::new(rows);
    for (header, values) in headers.into_iter().zip(cells) {
        batch.push_column(header, infer_column(values));
    }

    Ok(batch)
}

/// Infer the narrowest type that fits every non-null value.
fn infer_column(values: Vec<Option<String>>) -> ColumnData {
    let non_null: Vec<&str> = values.iter().flatten().map(String::as_str).collect();

    if non_null.is_empty() {
        return ColumnData::Utf8(values);
    }

    if non_null.iter().all(|v| v.parse::<i64>().is_ok()) {
        let parsed = values
            .iter()
            .map(|v| v.as_deref().and_then(|s| s.parse::<i64>().ok()))
            .collect();
        return ColumnData::Int64(parsed);
    }

    if non_null.iter().all(|v| v.parse::<f64>().is_ok()) {
        let parsed = values
            .iter()
            .map(|v| v.as_deref().and_then(|s| s.parse::<f64>().ok()))
            .collect();
        return ColumnData::Float64(parsed);
    }

    // Values carrying an explicit UTC offset stay raw text: converting
    // here would erase the offset before the transform stage or the
    // warehouse coercion can record it as tzoffset.
    let parsed_timestamps: Option<Vec<_>> = non_null.iter().map(|v| parse_timestamp(v)).collect();
    if let Some(timestamps) = parsed_timestamps {
        if timestamps.iter().all(|(_, offset)| offset.is_none()) {
            let parsed = values
                .iter()
                .map(|v| v.as_deref().and_then(|s| parse_timestamp(s).map(|(utc, _)| utc)))
                .collect();
            return ColumnData::Timestamp(parsed);
        }
    }

    ColumnData::Utf8(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_read_csv_infers_types() {
        let file = write_csv("count,score,taken_at,note\n1,1.5,2024-01-01 10:00:00,hello\n2,2.5,2024-01-02 11:00:00,world\n");

        let batch = read_csv(file.path()).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.column("count").unwrap().data.type_name(), "int64");
        assert_eq!(batch.column("score").unwrap().data.type_name(), "float64");
        assert_eq!(
            batch.column("taken_at").unwrap().data.type_name(),
            "timestamp"
        );
        assert_eq!(batch.column("note").unwrap().data.type_name(), "utf8");
    }

    #[test]
    fn test_empty_cells_become_nulls() {
        let file = write_csv("value,label\n1,\n,b\n");

        let batch = read_csv(file.path()).unwrap();
        match &batch.column("value").unwrap().data {
            ColumnData::Int64(v) => assert_eq!(v, &vec![Some(1), None]),
            _ => panic!("Expected int64 column"),
        }
        match &batch.column("label").unwrap().data {
            ColumnData::Utf8(v) => assert_eq!(v[0], None),
            _ => panic!("Expected utf8 column"),
        }
    }

    #[test]
    fn test_tz_aware_timestamps_stay_text() {
        let file = write_csv(
            "day_start,summary_date\n2024-01-01T08:00:00-04:00,2024-01-01\n2024-01-02T08:00:00+05:30,2024-01-02\n",
        );

        let batch = read_csv(file.path()).unwrap();
        assert_eq!(batch.column("day_start").unwrap().data.type_name(), "utf8");
        assert_eq!(
            batch.column("summary_date").unwrap().data.type_name(),
            "timestamp"
        );
    }

    #[test]
    fn test_mixed_numeric_falls_back_to_float() {
        let file = write_csv("value\n1\n2.5\n");

        let batch = read_csv(file.path()).unwrap();
        assert_eq!(batch.column("value").unwrap().data.type_name(), "float64");
    }

    #[test]
    fn test_header_only_file_is_empty_batch() {
        let file = write_csv("a,b\n");

        let batch = read_csv(file.path()).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
    }
}
