use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::util::pretty::pretty_format_batches;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::PartitionTable;

/// File extensions recognised as partitions.
pub const PARTITION_EXTENSIONS: &[&str] = &["parquet", "pq", "csv", "json"];

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Whether `path` is a Parquet piece, ignoring extension case.
pub fn is_parquet_file(path: &Path) -> bool {
    matches!(extension(path).as_str(), "parquet" | "pq")
}

/// Whether `path` looks like a partition file this loader can read.
pub fn is_partition_file(path: &Path) -> bool {
    PARTITION_EXTENSIONS.contains(&extension(path).as_str())
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load the given columns of one partition file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` / `.pq` – flat numeric or boolean columns (recommended)
/// * `.csv`             – header row, numeric cells, empty cell = null
/// * `.json`            – `[{ "col": 1.0, ... }, ...]`
pub fn load_partition(path: &Path, columns: &[String]) -> Result<PartitionTable> {
    let loaded = match extension(path).as_str() {
        "parquet" | "pq" => load_parquet(path, columns),
        "csv" => load_csv(path, columns),
        "json" => load_json(path, columns),
        other => Err(anyhow::anyhow!("Unsupported partition extension: .{other}")),
    };
    loaded.with_context(|| format!("loading partition {}", path.display()))
}

/// Exact number of rows in a partition.
///
/// Parquet answers from the footer without reading any pages.
pub fn count_rows(path: &Path) -> Result<u64> {
    let counted = match extension(path).as_str() {
        "parquet" | "pq" => {
            let file = std::fs::File::open(path).context("opening parquet file")?;
            let builder = ParquetRecordBatchReaderBuilder::try_new(file)
                .context("reading parquet metadata")?;
            Ok(builder.metadata().file_metadata().num_rows().max(0) as u64)
        }
        "csv" => {
            let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
            let mut n = 0u64;
            for record in reader.records() {
                record.with_context(|| format!("CSV row {n}"))?;
                n += 1;
            }
            Ok(n)
        }
        "json" => Ok(read_json_records(path)?.len() as u64),
        other => Err(anyhow::anyhow!("Unsupported partition extension: .{other}")),
    };
    counted.with_context(|| format!("counting rows of {}", path.display()))
}

/// First `n_rows` rows of a Parquet partition, rendered as a text table.
pub fn preview_parquet(path: &Path, n_rows: usize) -> Result<String> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?
        .with_batch_size(n_rows.max(1))
        .with_limit(n_rows)
        .build()
        .context("building parquet reader")?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("reading parquet rows")?;
    Ok(pretty_format_batches(&batches)?.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Read only the requested root columns; every record batch is appended in order.
fn load_parquet(path: &Path, columns: &[String]) -> Result<PartitionTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;

    let arrow_schema = builder.schema().clone();
    let mut roots = Vec::with_capacity(columns.len());
    for name in columns {
        let idx = arrow_schema
            .index_of(name)
            .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))?;
        roots.push(idx);
    }
    let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
    let reader = builder
        .with_projection(mask)
        .build()
        .context("building parquet reader")?;

    let mut data: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        for (out, name) in data.iter_mut().zip(columns) {
            let idx = schema
                .index_of(name)
                .map_err(|_| anyhow::anyhow!("projected batch missing '{name}' column"))?;
            extend_f64(out, batch.column(idx))
                .with_context(|| format!("column '{name}'"))?;
        }
    }

    Ok(PartitionTable::new(columns.to_vec(), data))
}

// -- Arrow helpers --

/// Append a numeric or boolean Arrow column as `f64`, nulls as `NaN`.
fn extend_f64(out: &mut Vec<f64>, col: &Arc<dyn Array>) -> Result<()> {
    out.reserve(col.len());
    match col.data_type() {
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            out.extend(arr.iter().map(|v| v.unwrap_or(f64::NAN)));
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            out.extend(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)));
        }
        DataType::Int64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int64Array>()
                .context("expected Int64Array")?;
            out.extend(arr.iter().map(|v| v.map_or(f64::NAN, |i| i as f64)));
        }
        DataType::Int32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Int32Array>()
                .context("expected Int32Array")?;
            out.extend(arr.iter().map(|v| v.map_or(f64::NAN, f64::from)));
        }
        DataType::Boolean => {
            let arr = col
                .as_any()
                .downcast_ref::<BooleanArray>()
                .context("expected BooleanArray")?;
            out.extend(arr.iter().map(|v| v.map_or(f64::NAN, |b| if b { 1.0 } else { 0.0 })));
        }
        other if other.is_numeric() => {
            // Remaining widths (Int8, UInt16, Float16, decimals, ...) go through the cast kernel.
            let casted = cast(col, &DataType::Float64).context("casting column to Float64")?;
            return extend_f64(out, &casted);
        }
        other => bail!("Expected a numeric or boolean column, got {other:?}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one numeric value per cell.
fn load_csv(path: &Path, columns: &[String]) -> Result<PartitionTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let indices = columns
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|h| h == name)
                .with_context(|| format!("CSV missing '{name}' column"))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut data: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for ((out, &idx), name) in data.iter_mut().zip(&indices).zip(columns) {
            let cell = record.get(idx).unwrap_or("");
            out.push(parse_cell(cell).with_context(|| format!("Row {row_no}, {name}"))?);
        }
    }

    Ok(PartitionTable::new(columns.to_vec(), data))
}

fn parse_cell(s: &str) -> Result<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(f64::NAN);
    }
    match s {
        "true" => Ok(1.0),
        "false" => Ok(0.0),
        _ => s
            .parse::<f64>()
            .with_context(|| format!("'{s}' is not a number")),
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

fn read_json_records(path: &Path) -> Result<Vec<JsonValue>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    match root {
        JsonValue::Array(records) => Ok(records),
        _ => bail!("Expected top-level JSON array"),
    }
}

/// Records-oriented JSON (`df.to_json(orient='records')`).
fn load_json(path: &Path, columns: &[String]) -> Result<PartitionTable> {
    let records = read_json_records(path)?;
    let mut data: Vec<Vec<f64>> = vec![Vec::with_capacity(records.len()); columns.len()];

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for (out, name) in data.iter_mut().zip(columns) {
            let value = match obj.get(name) {
                None | Some(JsonValue::Null) => f64::NAN,
                Some(JsonValue::Bool(b)) => f64::from(u8::from(*b)),
                Some(v) => v
                    .as_f64()
                    .with_context(|| format!("Row {i}, {name}: not a number"))?,
            };
            out.push(value);
        }
    }

    Ok(PartitionTable::new(columns.to_vec(), data))
}
