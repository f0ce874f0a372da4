#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

/// One series: `x1 = t`, `x2 = -t`, `y = t + offset`.
///
/// A window ending one step before the label therefore always holds
/// `x1 == y - offset - 1` in its last row.
pub fn write_ramp_partition(path: &Path, n_rows: usize, offset: f64) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("t", DataType::Int64, false),
        Field::new("x1", DataType::Float64, true),
        Field::new("x2", DataType::Float64, true),
        Field::new("y", DataType::Float64, true),
    ]));
    let t: Vec<i64> = (0..n_rows as i64).collect();
    let x1: Vec<f64> = t.iter().map(|&v| v as f64).collect();
    let x2: Vec<f64> = t.iter().map(|&v| -(v as f64)).collect();
    let y: Vec<f64> = t.iter().map(|&v| v as f64 + offset).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(t)),
            Arc::new(Float64Array::from(x1)),
            Arc::new(Float64Array::from(x2)),
            Arc::new(Float64Array::from(y)),
        ],
    )
    .expect("record batch");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create partition dirs");
    }
    let file = std::fs::File::create(path).expect("create parquet file");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("parquet writer");
    writer.write(&batch).expect("write batch");
    writer.close().expect("close writer");
}

/// `n_partitions` ramp partitions of `n_rows` rows under `dir`.
pub fn write_ramp_dataset(dir: &Path, n_partitions: usize, n_rows: usize) -> Vec<PathBuf> {
    (0..n_partitions)
        .map(|i| {
            let path = dir.join(format!("part-{i:03}.parquet"));
            write_ramp_partition(&path, n_rows, 0.0);
            path
        })
        .collect()
}

/// Small labels that a linear model can follow: `y = 0.5 * x1[t - 1] + 1`.
pub fn write_smooth_dataset(dir: &Path, n_partitions: usize, n_rows: usize) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("x1", DataType::Float64, true),
        Field::new("x2", DataType::Float64, true),
        Field::new("y", DataType::Float64, true),
    ]));
    for p in 0..n_partitions {
        let x1: Vec<f64> = (0..n_rows)
            .map(|t| ((t + 7 * p) as f64 * 0.1).sin())
            .collect();
        let x2: Vec<f64> = (0..n_rows)
            .map(|t| ((t + 3 * p) as f64 * 0.05).cos())
            .collect();
        let y: Vec<f64> = (0..n_rows)
            .map(|t| if t == 0 { 1.0 } else { 0.5 * x1[t - 1] + 1.0 })
            .collect();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Float64Array::from(x1)),
                Arc::new(Float64Array::from(x2)),
                Arc::new(Float64Array::from(y)),
            ],
        )
        .expect("record batch");

        std::fs::create_dir_all(dir).expect("create dataset dir");
        let file = std::fs::File::create(dir.join(format!("part-{p:03}.parquet")))
            .expect("create parquet file");
        let mut writer = ArrowWriter::try_new(file, schema.clone(), None).expect("parquet writer");
        writer.write(&batch).expect("write batch");
        writer.close().expect("close writer");
    }
}
