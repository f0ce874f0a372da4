use std::path::{Path, PathBuf};

use anyhow::Context;

use super::generator::{BatchGenerator, GeneratorSpec};
use super::loader;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// PartitionedDataset – the on-disk dataset accessor
// ---------------------------------------------------------------------------

/// A directory of partition files ("pieces"), each an ordered table of rows.
///
/// The partition list is discovered once and sorted, so the identifiers are
/// stable for the lifetime of the value. Nothing is held open.
#[derive(Debug, Clone)]
pub struct PartitionedDataset {
    root: PathBuf,
    partitions: Vec<PathBuf>,
}

impl PartitionedDataset {
    /// Discover every partition file under `root`, recursively.
    pub fn open(root: &Path) -> Result<Self> {
        let mut partitions = Vec::new();
        collect_partitions(root, &mut partitions)
            .with_context(|| format!("scanning dataset directory {}", root.display()))?;
        partitions.sort();

        if partitions.is_empty() {
            return Err(Error::dataset(format!(
                "no partition files under {}",
                root.display()
            )));
        }

        log::debug!(
            "dataset {}: {} partitions",
            root.display(),
            partitions.len()
        );

        Ok(PartitionedDataset {
            root: root.to_path_buf(),
            partitions,
        })
    }

    /// Build from an explicit partition list (kept in the given order).
    pub fn from_partitions(root: &Path, partitions: Vec<PathBuf>) -> Result<Self> {
        if partitions.is_empty() {
            return Err(Error::dataset("partition list is empty"));
        }
        Ok(PartitionedDataset {
            root: root.to_path_buf(),
            partitions,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ordered partition identifiers.
    pub fn partition_paths(&self) -> &[PathBuf] {
        &self.partitions
    }

    pub fn n_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Sum of every partition's row count.
    pub fn exact_row_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for path in &self.partitions {
            total += loader::count_rows(path)?;
        }
        Ok(total)
    }

    /// Rows of the first partition times the number of partitions.
    ///
    /// Only opens one file, which is what matters for datasets with many pieces.
    pub fn approx_row_count(&self) -> Result<u64> {
        let first = loader::count_rows(&self.partitions[0])?;
        Ok(first * self.partitions.len() as u64)
    }

    /// Row count used for deriving the training plan.
    ///
    /// Parquet datasets use the approximation; everything else is counted exactly.
    pub fn size_hint(&self) -> Result<u64> {
        let all_parquet = self.partitions.iter().all(|p| loader::is_parquet_file(p));
        if all_parquet {
            self.approx_row_count()
        } else {
            self.exact_row_count()
        }
    }

    /// Create a batch generator over a subset of this dataset's partitions.
    pub fn generate(&self, spec: GeneratorSpec) -> Result<BatchGenerator> {
        if let Some(stray) = spec
            .partitions
            .iter()
            .find(|p| !self.partitions.contains(p))
        {
            return Err(Error::dataset(format!(
                "partition {} does not belong to dataset {}",
                stray.display(),
                self.root.display()
            )));
        }
        BatchGenerator::new(spec)
    }
}

fn collect_partitions(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_partitions(&path, out)?;
        } else if loader::is_partition_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}
