use ndarray::{Array1, Array3};

use crate::error::Result;

/// Reserved feature value marking padded, non-observed window positions.
pub const MASK_VALUE: f32 = -1.0e9;

// ---------------------------------------------------------------------------
// PartitionTable – one partition file, column-major
// ---------------------------------------------------------------------------

/// The requested columns of a single partition, in on-disk (time) order.
///
/// Every column has the same length. Nulls are stored as `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionTable {
    /// Column names, in the order they were requested.
    pub column_names: Vec<String>,
    /// `columns[i][row]` is the value of `column_names[i]` at `row`.
    pub columns: Vec<Vec<f64>>,
}

impl PartitionTable {
    pub fn new(column_names: Vec<String>, columns: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(column_names.len(), columns.len());
        debug_assert!(columns.windows(2).all(|w| w[0].len() == w[1].len()));
        PartitionTable {
            column_names,
            columns,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Whether the partition has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .map(|i| self.columns[i].as_slice())
    }
}

// ---------------------------------------------------------------------------
// Example / Batch
// ---------------------------------------------------------------------------

/// One (feature-window, label) pair before batching.
///
/// `window` is row-major `[window_len, n_features]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub window: Vec<f32>,
    pub label: f32,
}

/// A fixed-size group of examples ready for a model step.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[batch_size, window_len, n_features]`
    pub features: Array3<f32>,
    /// `[batch_size]`
    pub labels: Array1<f32>,
}

impl Batch {
    /// Stack examples into a batch. All windows must have `window_len * n_features` values.
    pub fn from_examples(examples: Vec<Example>, window_len: usize, n_features: usize) -> Result<Self> {
        let batch_size = examples.len();
        let mut flat = Vec::with_capacity(batch_size * window_len * n_features);
        let mut labels = Vec::with_capacity(batch_size);
        for ex in examples {
            flat.extend_from_slice(&ex.window);
            labels.push(ex.label);
        }
        let features = Array3::from_shape_vec((batch_size, window_len, n_features), flat)?;
        Ok(Batch {
            features,
            labels: Array1::from(labels),
        })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn window_len(&self) -> usize {
        self.features.shape()[1]
    }

    pub fn n_features(&self) -> usize {
        self.features.shape()[2]
    }

    /// Split into at most `n` contiguous shards along the batch axis.
    pub fn shards(&self, n: usize) -> Vec<Batch> {
        let n = n.clamp(1, self.len().max(1));
        let per = self.len().div_ceil(n);
        (0..n)
            .filter_map(|i| {
                let start = i * per;
                let end = ((i + 1) * per).min(self.len());
                (start < end).then(|| Batch {
                    features: self
                        .features
                        .slice(ndarray::s![start..end, .., ..])
                        .to_owned(),
                    labels: self.labels.slice(ndarray::s![start..end]).to_owned(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(v: f32) -> Example {
        Example {
            window: vec![v; 6],
            label: v,
        }
    }

    #[test]
    fn from_examples_builds_expected_shape() {
        let batch = Batch::from_examples((0..4).map(|i| example(i as f32)).collect(), 3, 2).unwrap();
        assert_eq!(batch.features.shape(), &[4, 3, 2]);
        assert_eq!(batch.labels.to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(batch.features[[2, 1, 1]], 2.0);
    }

    #[test]
    fn mismatched_window_is_an_error() {
        let bad = vec![Example {
            window: vec![0.0; 5],
            label: 0.0,
        }];
        assert!(Batch::from_examples(bad, 3, 2).is_err());
    }

    #[test]
    fn shards_cover_the_batch() {
        let batch = Batch::from_examples((0..5).map(|i| example(i as f32)).collect(), 3, 2).unwrap();
        let shards = batch.shards(2);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].len() + shards[1].len(), 5);
        assert_eq!(shards[1].labels[0], 3.0);
    }

    #[test]
    fn table_column_lookup() {
        let table = PartitionTable::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("b"), Some(&[3.0, 4.0][..]));
        assert!(table.column("c").is_none());
    }
}
