use serde::Serialize;

use crate::config::{MinValSamples, TrainParams};
use crate::error::Result;

fn ceil_div(a: u64, b: u64) -> u64 {
    if b == 0 { 0 } else { a.div_ceil(b) }
}

/// Sample, epoch and batch counts derived once per run.
///
/// Fields are private; the plan cannot change after [`derive`](Self::derive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingPlan {
    n_samples: u64,
    n_train_samples: u64,
    n_val_samples: u64,
    n_epochs: u64,
    n_train_samples_per_epoch: u64,
    n_train_batches_per_epoch: u64,
    n_val_samples_per_epoch: u64,
    n_val_batches_per_epoch: u64,
    early_stop_patience: u64,
}

impl TrainingPlan {
    /// Derive the plan from training parameters and, optionally, the dataset row count.
    ///
    /// The row count only matters when `n_samples_max_multiple_of_data_size` is set.
    pub fn derive(params: &TrainParams, data_size: Option<u64>) -> Result<Self> {
        params.validate()?;

        let n_samples = match (params.n_samples_max_multiple_of_data_size, data_size) {
            (Some(multiple), Some(size)) => {
                ((multiple * size as f64).round() as u64).min(params.n_samples_max)
            }
            _ => params.n_samples_max,
        };

        let n_train_samples = ((n_samples as f64 * params.train_proportion).round() as u64).min(n_samples);
        let n_val_samples = n_samples - n_train_samples;

        let n_epochs = ceil_div(n_train_samples, params.n_train_samples_per_epoch)
            .clamp(1, params.max_n_epochs);

        let batch_size = params.batch_size as u64;
        let n_train_batches_per_epoch =
            ceil_div(ceil_div(n_train_samples, n_epochs), batch_size).max(1);
        let n_train_samples_per_epoch = n_train_batches_per_epoch * batch_size;

        let wanted_val = match params.min_n_val_samples_per_epoch {
            MinValSamples::All => n_val_samples,
            MinValSamples::AtLeast(k) => k.max(ceil_div(n_val_samples, n_epochs)).min(n_val_samples),
        };
        let val_batch_size = params.val_batch_size as u64;
        let n_val_batches_per_epoch = ceil_div(wanted_val, val_batch_size);
        let n_val_samples_per_epoch = n_val_batches_per_epoch * val_batch_size;

        let early_stop = &params.early_stop;
        let early_stop_patience = early_stop_patience(
            early_stop.patience_min_n_epochs,
            early_stop.patience_proportion_total_n_epochs,
            n_epochs,
        );

        Ok(TrainingPlan {
            n_samples,
            n_train_samples,
            n_val_samples,
            n_epochs,
            n_train_samples_per_epoch,
            n_train_batches_per_epoch,
            n_val_samples_per_epoch,
            n_val_batches_per_epoch,
            early_stop_patience,
        })
    }

    pub fn n_samples(&self) -> u64 {
        self.n_samples
    }

    pub fn n_train_samples(&self) -> u64 {
        self.n_train_samples
    }

    pub fn n_val_samples(&self) -> u64 {
        self.n_val_samples
    }

    pub fn n_epochs(&self) -> u64 {
        self.n_epochs
    }

    pub fn n_train_samples_per_epoch(&self) -> u64 {
        self.n_train_samples_per_epoch
    }

    pub fn n_train_batches_per_epoch(&self) -> u64 {
        self.n_train_batches_per_epoch
    }

    pub fn n_val_samples_per_epoch(&self) -> u64 {
        self.n_val_samples_per_epoch
    }

    pub fn n_val_batches_per_epoch(&self) -> u64 {
        self.n_val_batches_per_epoch
    }

    pub fn early_stop_patience(&self) -> u64 {
        self.early_stop_patience
    }

    /// Same plan with validation switched off, for runs without validation partitions.
    pub fn without_validation(mut self) -> Self {
        self.n_val_samples_per_epoch = 0;
        self.n_val_batches_per_epoch = 0;
        self
    }
}

/// `max(floor, ceil(proportion * total_epochs))`
pub fn early_stop_patience(floor: u64, proportion: f64, total_epochs: u64) -> u64 {
    floor.max((proportion * total_epochs as f64).ceil() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TrainParams {
        TrainParams {
            batch_size: 100,
            val_batch_size: 250,
            train_proportion: 0.8,
            n_samples_max: 1_000_000,
            n_samples_max_multiple_of_data_size: Some(2.0),
            n_train_samples_per_epoch: 10_000,
            max_n_epochs: 100,
            min_n_val_samples_per_epoch: MinValSamples::AtLeast(1_000),
            ..TrainParams::default()
        }
    }

    #[test]
    fn patience_formula() {
        assert_eq!(early_stop_patience(5, 0.1, 100), 10);
        assert_eq!(early_stop_patience(5, 0.01, 100), 5);
        assert_eq!(early_stop_patience(0, 0.32, 7), 3);
    }

    #[test]
    fn worked_example() {
        // 2 x 25_000 rows = 50_000 samples, 40_000 train, 10_000 val.
        let plan = TrainingPlan::derive(&params(), Some(25_000)).unwrap();
        assert_eq!(plan.n_samples(), 50_000);
        assert_eq!(plan.n_train_samples(), 40_000);
        assert_eq!(plan.n_val_samples(), 10_000);
        assert_eq!(plan.n_epochs(), 4);
        assert_eq!(plan.n_train_batches_per_epoch(), 100);
        assert_eq!(plan.n_train_samples_per_epoch(), 10_000);
        // max(1_000, 10_000 / 4) = 2_500 -> 10 batches of 250
        assert_eq!(plan.n_val_batches_per_epoch(), 10);
        assert_eq!(plan.n_val_samples_per_epoch(), 2_500);
        // max(5, ceil(0.32 * 4))
        assert_eq!(plan.early_stop_patience(), 5);
    }

    #[test]
    fn data_size_ignored_without_multiple() {
        let mut p = params();
        p.n_samples_max = 20_000;
        p.n_samples_max_multiple_of_data_size = None;
        let plan = TrainingPlan::derive(&p, Some(1)).unwrap();
        assert_eq!(plan.n_samples(), 20_000);
    }

    #[test]
    fn epochs_are_capped() {
        let mut p = params();
        p.max_n_epochs = 3;
        p.early_stop.patience_min_n_epochs = 1;
        p.early_stop.patience_proportion_total_n_epochs = 1.0;
        let plan = TrainingPlan::derive(&p, Some(25_000)).unwrap();
        assert_eq!(plan.n_epochs(), 3);
        // ceil(40_000 / 3) = 13_334 -> 134 batches
        assert_eq!(plan.n_train_batches_per_epoch(), 134);
        assert_eq!(plan.early_stop_patience(), 3);
    }

    #[test]
    fn all_validation_samples_policy() {
        let mut p = params();
        p.min_n_val_samples_per_epoch = MinValSamples::All;
        let plan = TrainingPlan::derive(&p, Some(25_000)).unwrap();
        assert_eq!(plan.n_val_batches_per_epoch(), 40);
    }

    #[test]
    fn full_train_proportion_has_no_validation_batches() {
        let mut p = params();
        p.train_proportion = 1.0;
        let plan = TrainingPlan::derive(&p, Some(25_000)).unwrap();
        assert_eq!(plan.n_val_samples(), 0);
        assert_eq!(plan.n_val_batches_per_epoch(), 0);
    }

    #[test]
    fn invalid_params_fail() {
        let mut p = params();
        p.batch_size = 0;
        assert!(TrainingPlan::derive(&p, None).is_err());
    }
}
