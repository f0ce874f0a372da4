use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Write a synthetic partitioned time-series dataset for trying out `windowfeed`.
///
/// Every partition is one independent series with columns `t`, `x1`, `x2`
/// and `y`, where `y` follows the features of the previous steps plus noise.
#[derive(Parser, Debug)]
struct Args {
    /// Output directory, created if missing
    #[arg(short, long, default_value = "sample_data")]
    out: PathBuf,

    #[arg(short, long, default_value_t = 12)]
    partitions: usize,

    /// Rows per partition
    #[arg(short, long, default_value_t = 2_000)]
    rows: usize,

    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Fraction of label values replaced by large outliers
    #[arg(long, default_value_t = 0.002)]
    outlier_rate: f64,

    /// Fraction of feature cells left empty
    #[arg(long, default_value_t = 0.01)]
    missing_rate: f64,
}

fn gauss(rng: &mut StdRng, std_dev: f64) -> f64 {
    // Box-Muller
    let u1: f64 = rng.random::<f64>().max(1e-15);
    let u2: f64 = rng.random();
    std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

struct Series {
    t: Vec<i64>,
    x1: Vec<Option<f64>>,
    x2: Vec<Option<f64>>,
    y: Vec<f64>,
}

fn generate_series(rng: &mut StdRng, rows: usize, args: &Args) -> Series {
    let phase: f64 = rng.random_range(0.0..std::f64::consts::TAU);
    let mut drift = 0.0;
    let mut x1 = Vec::with_capacity(rows);
    let mut x2 = Vec::with_capacity(rows);
    let mut y = Vec::with_capacity(rows);

    for i in 0..rows {
        drift += gauss(rng, 0.05);
        let a = (i as f64 * 0.07 + phase).sin() + gauss(rng, 0.1);
        let b = drift + gauss(rng, 0.1);

        let prev_a = if i > 0 { x1.get(i - 1).copied().flatten().unwrap_or(a) } else { a };
        let prev_b = if i > 0 { x2.get(i - 1).copied().flatten().unwrap_or(b) } else { b };
        let mut label = 10.0 + 3.0 * prev_a - 1.5 * prev_b + gauss(rng, 0.2);
        if rng.random_bool(args.outlier_rate) {
            label *= rng.random_range(50.0..200.0);
        }

        x1.push((!rng.random_bool(args.missing_rate)).then_some(a));
        x2.push((!rng.random_bool(args.missing_rate)).then_some(b));
        y.push(label);
    }

    Series {
        t: (0..rows as i64).collect(),
        x1,
        x2,
        y,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;

    let schema = Arc::new(Schema::new(vec![
        Field::new("t", DataType::Int64, false),
        Field::new("x1", DataType::Float64, true),
        Field::new("x2", DataType::Float64, true),
        Field::new("y", DataType::Float64, false),
    ]));

    for part in 0..args.partitions {
        let series = generate_series(&mut rng, args.rows, &args);
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(series.t)),
                Arc::new(Float64Array::from(series.x1)),
                Arc::new(Float64Array::from(series.x2)),
                Arc::new(Float64Array::from(series.y)),
            ],
        )
        .context("building record batch")?;

        let path = args.out.join(format!("part-{part:05}.parquet"));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
        writer.write(&batch)?;
        writer.close()?;
    }

    println!(
        "Wrote {} partitions x {} rows to {}",
        args.partitions,
        args.rows,
        args.out.display()
    );
    Ok(())
}
