use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use windowfeed::data::loader::{is_parquet_file, preview_parquet};
use windowfeed::data::{PartitionedDataset, split_partitions};
use windowfeed::{JobConfig, TrainingDriver};

/// Train window regressors on partitioned time-series data.
#[derive(Parser, Debug)]
#[command(name = "windowfeed", author, version, about)]
struct Args {
    /// Log filter used when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on a partitioned dataset
    Train {
        /// Directory of partition files (.parquet, .csv, .json)
        #[arg(short, long)]
        data: PathBuf,

        /// JSON job configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Log run progress at info level instead of debug
        #[arg(short, long)]
        verbose: bool,

        /// Write the training report as JSON to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
    },

    /// Show partitions, row counts and a sample split
    Inspect {
        /// Directory of partition files
        #[arg(short, long)]
        data: PathBuf,

        /// Fraction of partitions assigned to training
        #[arg(long, default_value_t = 0.8)]
        train_proportion: f64,

        /// Print the first rows of the first Parquet partition
        #[arg(long, value_name = "ROWS")]
        head: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    match args.command {
        Command::Train {
            data,
            config,
            verbose,
            report,
        } => train(data, config, verbose, report),
        Command::Inspect {
            data,
            train_proportion,
            head,
        } => inspect(data, train_proportion, head),
    }
}

fn train(data: PathBuf, config: PathBuf, verbose: bool, report: Option<PathBuf>) -> Result<()> {
    let mut job = JobConfig::from_file(&config)
        .with_context(|| format!("loading config {}", config.display()))?;
    job.log.verbose |= verbose;

    let dataset = PartitionedDataset::open(&data)?;
    log::info!(
        "dataset {}: {} partitions",
        dataset.root().display(),
        dataset.n_partitions()
    );

    let driver = TrainingDriver::new(job)?;
    let outcome = driver.run(&dataset)?;

    println!(
        "{} ({}): {} epochs, {:?}, weights at {}",
        outcome.model_name,
        outcome.factory,
        outcome.history.epochs.len(),
        outcome.history.termination,
        outcome.artifacts.weights_path.display()
    );
    if let Some(path) = report {
        std::fs::write(&path, serde_json::to_string_pretty(&outcome)?)
            .with_context(|| format!("writing report {}", path.display()))?;
    }
    Ok(())
}

fn inspect(data: PathBuf, train_proportion: f64, head: Option<usize>) -> Result<()> {
    let dataset = PartitionedDataset::open(&data)?;
    println!("root:        {}", dataset.root().display());
    println!("partitions:  {}", dataset.n_partitions());
    println!("rows:        {}", dataset.exact_row_count()?);
    println!("size hint:   {}", dataset.size_hint()?);

    let split = split_partitions(dataset.partition_paths(), train_proportion)?;
    println!(
        "split @ {train_proportion}: {} train / {} val partitions",
        split.train.len(),
        split.val.len()
    );

    if let Some(n_rows) = head {
        let first = dataset
            .partition_paths()
            .iter()
            .find(|p| is_parquet_file(p));
        match first {
            Some(path) => println!("{}\n{}", path.display(), preview_parquet(path, n_rows)?),
            None => println!("no parquet partition to preview"),
        }
    }
    Ok(())
}
