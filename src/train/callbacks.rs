use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Monitor – tracks the best value of one metric
// ---------------------------------------------------------------------------

/// Whether the monitored metric should go down or up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    Min,
    Max,
    /// Inferred from the metric name.
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl MonitorMode {
    /// Accuracy-like names (`acc`, `fmeasure*`) maximize; everything else minimizes.
    pub fn direction(self, metric_name: &str) -> Direction {
        match self {
            MonitorMode::Min => Direction::Minimize,
            MonitorMode::Max => Direction::Maximize,
            MonitorMode::Auto => {
                if metric_name.contains("acc") || metric_name.starts_with("fmeasure") {
                    Direction::Maximize
                } else {
                    Direction::Minimize
                }
            }
        }
    }
}

/// Best-so-far tracking with a significance threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    pub direction: Direction,
    pub min_delta: f64,
    best: Option<f64>,
}

impl Monitor {
    pub fn new(direction: Direction, min_delta: f64) -> Self {
        Monitor {
            direction,
            min_delta: min_delta.abs(),
            best: None,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Whether `value` beats the best by more than `min_delta`.
    pub fn is_improvement(&self, value: f64) -> bool {
        let Some(best) = self.best else {
            return !value.is_nan();
        };
        match self.direction {
            Direction::Minimize => value < best - self.min_delta,
            Direction::Maximize => value > best + self.min_delta,
        }
    }

    /// Record `value`; returns whether it was an improvement.
    pub fn update(&mut self, value: f64) -> bool {
        let improved = self.is_improvement(value);
        if improved {
            self.best = Some(value);
        }
        improved
    }
}

// ---------------------------------------------------------------------------
// The four per-epoch callbacks
// ---------------------------------------------------------------------------

/// Stops training as soon as a step loss is NaN or infinite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminateOnNan;

impl TerminateOnNan {
    pub fn should_terminate(&self, loss: f32) -> bool {
        !loss.is_finite()
    }
}

/// Decides when weights are written.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    monitor: Monitor,
    pub best_only: bool,
}

impl ModelCheckpoint {
    pub fn new(direction: Direction, best_only: bool) -> Self {
        // Checkpointing compares against the raw best, without a significance margin.
        ModelCheckpoint {
            monitor: Monitor::new(direction, 0.0),
            best_only,
        }
    }

    /// Whether to save after this epoch. Without a metric every epoch is saved.
    pub fn on_epoch_end(&mut self, value: Option<f64>) -> bool {
        match value {
            Some(v) => {
                let improved = self.monitor.update(v);
                !self.best_only || improved
            }
            None => true,
        }
    }
}

/// Scales the learning rate down after `patience` stagnant epochs.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    monitor: Monitor,
    pub patience: u64,
    pub factor: f64,
    pub min_lr: f64,
    wait: u64,
}

impl ReduceLrOnPlateau {
    pub fn new(direction: Direction, min_delta: f64, patience: u64, factor: f64) -> Self {
        ReduceLrOnPlateau {
            monitor: Monitor::new(direction, min_delta),
            patience,
            factor,
            min_lr: 0.0,
            wait: 0,
        }
    }

    /// Returns the new learning rate when a reduction happens.
    pub fn on_epoch_end(&mut self, value: Option<f64>, lr: f64) -> Option<f64> {
        let v = value?;
        if self.monitor.update(v) {
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait >= self.patience && lr > self.min_lr {
            self.wait = 0;
            return Some((lr * self.factor).max(self.min_lr));
        }
        None
    }
}

/// Halts training after `patience` epochs without significant improvement.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: Monitor,
    pub patience: u64,
    wait: u64,
}

impl EarlyStopping {
    pub fn new(direction: Direction, min_delta: f64, patience: u64) -> Self {
        EarlyStopping {
            monitor: Monitor::new(direction, min_delta),
            patience,
            wait: 0,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.monitor.best()
    }

    /// Whether training should stop now.
    pub fn on_epoch_end(&mut self, value: Option<f64>) -> bool {
        let Some(v) = value else {
            return false;
        };
        if self.monitor.update(v) {
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }
}

// ---------------------------------------------------------------------------
// EpochCallbacks – fixed evaluation order
// ---------------------------------------------------------------------------

/// What the end of an epoch decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochDecision {
    pub save_checkpoint: bool,
    pub new_learning_rate: Option<f64>,
    pub stop: bool,
}

/// Checkpoint, then LR reduction, then early stopping, always in that order,
/// all looking at the same metric value.
#[derive(Debug, Clone)]
pub struct EpochCallbacks {
    pub nan: TerminateOnNan,
    pub checkpoint: ModelCheckpoint,
    pub reduce_lr: ReduceLrOnPlateau,
    pub early_stop: EarlyStopping,
}

impl EpochCallbacks {
    pub fn on_epoch_end(&mut self, value: Option<f64>, lr: f64) -> EpochDecision {
        let save_checkpoint = self.checkpoint.on_epoch_end(value);
        let new_learning_rate = self.reduce_lr.on_epoch_end(value, lr);
        let stop = self.early_stop.on_epoch_end(value);
        EpochDecision {
            save_checkpoint,
            new_learning_rate,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_mode_infers_direction_from_name() {
        assert_eq!(MonitorMode::Auto.direction("val_loss"), Direction::Minimize);
        assert_eq!(MonitorMode::Auto.direction("val_acc"), Direction::Maximize);
        assert_eq!(MonitorMode::Auto.direction("fmeasure_macro"), Direction::Maximize);
        assert_eq!(MonitorMode::Max.direction("val_loss"), Direction::Maximize);
    }

    #[test]
    fn monitor_respects_min_delta() {
        let mut m = Monitor::new(Direction::Minimize, 0.1);
        assert!(m.update(1.0));
        assert!(!m.update(0.95));
        assert!(m.update(0.85));
        assert_eq!(m.best(), Some(0.85));
        assert!(!m.update(f64::NAN));
    }

    #[test]
    fn best_only_checkpoint_saves_on_improvement() {
        let mut c = ModelCheckpoint::new(Direction::Minimize, true);
        let saves: Vec<bool> = [3.0, 2.0, 2.5, 1.0]
            .into_iter()
            .map(|v| c.on_epoch_end(Some(v)))
            .collect();
        assert_eq!(saves, vec![true, true, false, true]);

        let mut every = ModelCheckpoint::new(Direction::Minimize, false);
        assert!(every.on_epoch_end(Some(3.0)));
        assert!(every.on_epoch_end(Some(4.0)));
        assert!(every.on_epoch_end(None));
    }

    #[test]
    fn plateau_reduces_learning_rate_after_patience() {
        let mut r = ReduceLrOnPlateau::new(Direction::Minimize, 0.0, 2, 0.5);
        assert_eq!(r.on_epoch_end(Some(1.0), 0.1), None);
        assert_eq!(r.on_epoch_end(Some(1.0), 0.1), None);
        assert_eq!(r.on_epoch_end(Some(1.2), 0.1), Some(0.05));
        // Counter resets after a reduction.
        assert_eq!(r.on_epoch_end(Some(1.1), 0.05), None);
        assert_eq!(r.on_epoch_end(None, 0.05), None);
    }

    #[test]
    fn early_stopping_counts_stagnant_epochs() {
        let mut e = EarlyStopping::new(Direction::Minimize, 0.01, 3);
        assert!(!e.on_epoch_end(Some(1.0)));
        assert!(!e.on_epoch_end(Some(0.995)));
        assert!(!e.on_epoch_end(Some(0.999)));
        assert!(e.on_epoch_end(Some(1.0)));
        assert_eq!(e.best(), Some(1.0));
    }

    #[test]
    fn callbacks_evaluate_in_fixed_order() {
        let mut cbs = EpochCallbacks {
            nan: TerminateOnNan,
            checkpoint: ModelCheckpoint::new(Direction::Minimize, true),
            reduce_lr: ReduceLrOnPlateau::new(Direction::Minimize, 0.0, 1, 0.5),
            early_stop: EarlyStopping::new(Direction::Minimize, 0.0, 1),
        };
        let first = cbs.on_epoch_end(Some(1.0), 0.2);
        assert_eq!(
            first,
            EpochDecision {
                save_checkpoint: true,
                new_learning_rate: None,
                stop: false
            }
        );
        let second = cbs.on_epoch_end(Some(1.5), 0.2);
        assert!(!second.save_checkpoint);
        assert_eq!(second.new_learning_rate, Some(0.1));
        assert!(second.stop);
        assert!(cbs.nan.should_terminate(f32::NAN));
        assert!(!cbs.nan.should_terminate(0.5));
    }
}
