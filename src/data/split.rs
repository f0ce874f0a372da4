use std::path::PathBuf;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::error::{Error, Result};

/// Disjoint train / validation partition lists covering the whole dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSplit {
    pub train: Vec<PathBuf>,
    pub val: Vec<PathBuf>,
}

/// Shuffle partitions and cut at `ceil(train_proportion * n)`.
///
/// Splitting is partition-granular: rows of one partition never end up on
/// both sides. Every call draws a fresh split.
pub fn split_partitions(partitions: &[PathBuf], train_proportion: f64) -> Result<PartitionSplit> {
    split_partitions_with(partitions, train_proportion, &mut rand::rng())
}

/// [`split_partitions`] with a caller-supplied RNG.
pub fn split_partitions_with<R: Rng + ?Sized>(
    partitions: &[PathBuf],
    train_proportion: f64,
    rng: &mut R,
) -> Result<PartitionSplit> {
    if partitions.is_empty() {
        return Err(Error::dataset("cannot split an empty partition list"));
    }
    if !(train_proportion > 0.0 && train_proportion <= 1.0) {
        return Err(Error::config(format!(
            "train proportion must be in (0, 1], got {train_proportion}"
        )));
    }

    let mut shuffled = partitions.to_vec();
    shuffled.shuffle(rng);

    let n = shuffled.len();
    let split_at = ((train_proportion * n as f64).ceil() as usize).min(n);
    let val = shuffled.split_off(split_at);

    log::debug!(
        "partition split: {} train, {} validation",
        shuffled.len(),
        val.len()
    );

    Ok(PartitionSplit {
        train: shuffled,
        val,
    })
}
