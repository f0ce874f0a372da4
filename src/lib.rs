//! Batch feeding and training driver for window-based regression on
//! partitioned time-series tables.
//!
//! The [`data`] layer turns a directory of partition files into an endless,
//! re-entrant stream of fixed-shape batches; the [`train`] layer derives
//! sample and epoch counts, builds a model from the registry and drives it
//! through one of two strategies.

pub mod config;
pub mod data;
pub mod error;
pub mod train;

pub use config::JobConfig;
pub use error::{Error, Result};
pub use train::{TrainingDriver, TrainingReport};
