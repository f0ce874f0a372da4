/// Data layer: partition files to fixed-size training batches.
///
/// Architecture:
/// ```text
///  *.parquet / *.csv / *.json partitions
///        │
///        ▼
///   ┌─────────────────────┐
///   │ PartitionedDataset   │  discover pieces, row counts
///   └─────────────────────┘
///        │ split
///        ▼
///   ┌──────────┐   ┌──────────┐
///   │  train    │   │   val    │  partition-granular
///   └──────────┘   └──────────┘
///        │  + filter (label outlier bounds)
///        ▼
///   ┌──────────────┐
///   │ BatchGenerator│  spec only; each call spawns readers
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ prefetch  │  bounded queue, N workers
///   └──────────┘
/// ```

pub mod dataset;
pub mod filter;
pub mod generator;
pub mod loader;
pub mod model;
pub mod prefetch;
pub mod split;

pub use dataset::PartitionedDataset;
pub use filter::{Bounds, LabelFilter, RowFilter};
pub use generator::{
    BatchGenerator, Batches, GeneratorSpec, SamplingMode, WindowOffsets, assert_transferable,
};
pub use model::{Batch, Example, MASK_VALUE, PartitionTable};
pub use prefetch::{PrefetchSettings, Prefetcher};
pub use split::{PartitionSplit, split_partitions};
