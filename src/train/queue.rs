use super::callbacks::{Direction, EarlyStopping};
use super::fit::{EpochLog, FitHistory, Termination, evaluate};
use super::network::{CompiledModel, ModelStructure, WindowMlp, Weights};
use super::objective::Objective;
use super::schedule::LossPlateauLrDecay;
use crate::data::BatchGenerator;
use crate::error::{Error, Result};

/// Epoch limits handed to a queue-reader model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRun {
    pub max_epoch: u64,
    pub early_stopping_patience: u64,
    pub num_train_batches_per_epoch: u64,
    pub num_test_batches_per_epoch: u64,
}

/// A model that consumes batch sources directly and owns its epoch loop.
pub trait QueueReaderModel {
    fn learning_rate(&self) -> f64;

    fn lr_decay(&self) -> f64;

    fn structure(&self) -> ModelStructure;

    fn weights(&self) -> &Weights;

    fn train(
        &mut self,
        train_input: &BatchGenerator,
        val_input: Option<&BatchGenerator>,
        lr_scheduler: LossPlateauLrDecay,
        run: QueueRun,
    ) -> Result<FitHistory>;
}

/// Feed-forward window regressor with a loss-plateau schedule and
/// patience-based stopping built in.
pub struct QueueReaderTrainer {
    model: CompiledModel,
    lr_decay: f64,
}

impl QueueReaderTrainer {
    pub fn new(net: WindowMlp, objective: Objective, learning_rate: f64, lr_decay: f64) -> Self {
        QueueReaderTrainer {
            model: CompiledModel::compile(Box::new(net), objective, learning_rate),
            lr_decay,
        }
    }
}

impl QueueReaderModel for QueueReaderTrainer {
    fn learning_rate(&self) -> f64 {
        self.model.learning_rate()
    }

    fn lr_decay(&self) -> f64 {
        self.lr_decay
    }

    fn structure(&self) -> ModelStructure {
        ModelStructure {
            kind: "queue_reader_mlp".to_string(),
            ..self.model.structure()
        }
    }

    fn weights(&self) -> &Weights {
        self.model.weights()
    }

    fn train(
        &mut self,
        train_input: &BatchGenerator,
        val_input: Option<&BatchGenerator>,
        mut lr_scheduler: LossPlateauLrDecay,
        run: QueueRun,
    ) -> Result<FitHistory> {
        let mut train = train_input.call();
        let mut val = match val_input {
            Some(g) if run.num_test_batches_per_epoch > 0 => Some(g.call()),
            _ => None,
        };
        let mut stopper = EarlyStopping::new(Direction::Minimize, 0.0, run.early_stopping_patience);
        let mut epochs = Vec::new();
        self.model.set_learning_rate(lr_scheduler.learning_rate);

        for epoch in 1..=run.max_epoch {
            let mut loss_sum = 0.0;
            for step in 0..run.num_train_batches_per_epoch {
                let batch = train
                    .next()
                    .unwrap_or_else(|| Err(Error::Worker("train input ended".to_string())))?;
                let loss = self.model.train_on_batch(&batch);
                if !loss.is_finite() {
                    log::warn!("queue reader: invalid loss at epoch {epoch}, step {step}");
                    return Ok(FitHistory {
                        epochs,
                        termination: Termination::NanLoss { epoch, step },
                        final_learning_rate: self.model.learning_rate(),
                        checkpointed: false,
                    });
                }
                loss_sum += f64::from(loss);
            }
            let loss = loss_sum / run.num_train_batches_per_epoch.max(1) as f64;

            let val_loss = match val.as_mut() {
                Some(v) => evaluate(&self.model, v, run.num_test_batches_per_epoch)?,
                None => None,
            };
            let tracked = val_loss.unwrap_or(loss);
            let lr = self.model.learning_rate();
            epochs.push(EpochLog {
                epoch,
                loss,
                val_loss,
                learning_rate: lr,
                checkpointed: false,
            });
            log::debug!("queue reader epoch {epoch}: loss {loss:.6}, tracked {tracked:.6}, lr {lr}");

            self.model.set_learning_rate(lr_scheduler.step(tracked));
            if stopper.on_epoch_end(Some(tracked)) {
                return Ok(FitHistory {
                    epochs,
                    termination: Termination::EarlyStop { epoch },
                    final_learning_rate: self.model.learning_rate(),
                    checkpointed: false,
                });
            }
        }

        Ok(FitHistory {
            epochs,
            termination: Termination::MaxEpochs,
            final_learning_rate: self.model.learning_rate(),
            checkpointed: false,
        })
    }
}
