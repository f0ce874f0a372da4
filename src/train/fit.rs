use rand::seq::SliceRandom;
use serde::Serialize;

use super::callbacks::EpochCallbacks;
use super::network::CompiledModel;
use super::persist::ModelArtifacts;
use crate::config::LogSettings;
use crate::data::Batch;
use crate::error::{Error, Result};

/// Metrics the fit loop can monitor.
pub const MONITORABLE: &[&str] = &["loss", "val_loss"];

/// Why training ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    MaxEpochs,
    EarlyStop { epoch: u64 },
    NanLoss { epoch: u64, step: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochLog {
    pub epoch: u64,
    pub loss: f64,
    pub val_loss: Option<f64>,
    pub learning_rate: f64,
    pub checkpointed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitHistory {
    pub epochs: Vec<EpochLog>,
    pub termination: Termination,
    pub final_learning_rate: f64,
    /// Whether any checkpoint was written during this fit.
    pub checkpointed: bool,
}

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: u64,
    pub steps_per_epoch: u64,
    pub validation_steps: u64,
    /// `loss` or `val_loss`.
    pub monitor: String,
    pub shuffle_batches: bool,
    pub log: LogSettings,
}

/// Mean loss over `steps` batches without updating weights.
pub fn evaluate<V>(model: &CompiledModel, val: &mut V, steps: u64) -> Result<Option<f64>>
where
    V: Iterator<Item = Result<Batch>>,
{
    let mut total = 0.0;
    let mut seen = 0usize;
    for _ in 0..steps {
        let batch = next_batch(val)?;
        total += f64::from(model.test_on_batch(&batch)) * batch.len() as f64;
        seen += batch.len();
    }
    Ok((seen > 0).then(|| total / seen as f64))
}

fn next_batch<I>(source: &mut I) -> Result<Batch>
where
    I: Iterator<Item = Result<Batch>>,
{
    source
        .next()
        .unwrap_or_else(|| Err(Error::Worker("batch source ended".to_string())))
}

/// Drive the epoch loop.
///
/// Per epoch: train steps (aborting on a non-finite loss), validation, then
/// checkpoint, learning-rate reduction and early stopping in that order.
pub fn fit<T, V>(
    model: &mut CompiledModel,
    train: &mut T,
    mut val: Option<&mut V>,
    options: &FitOptions,
    callbacks: &mut EpochCallbacks,
    artifacts: &ModelArtifacts,
) -> Result<FitHistory>
where
    T: Iterator<Item = Result<Batch>>,
    V: Iterator<Item = Result<Batch>>,
{
    if !MONITORABLE.contains(&options.monitor.as_str()) {
        return Err(Error::config(format!(
            "cannot monitor '{}'; expected one of {MONITORABLE:?}",
            options.monitor
        )));
    }

    let level = options.log.level();
    let mut epochs = Vec::new();
    let mut checkpointed = false;
    let mut warned_missing_metric = false;
    let mut rng = rand::rng();

    for epoch in 1..=options.epochs {
        let mut batches = Vec::new();
        if options.shuffle_batches {
            for _ in 0..options.steps_per_epoch {
                batches.push(next_batch(train)?);
            }
            batches.shuffle(&mut rng);
        }

        let mut loss_sum = 0.0;
        for step in 0..options.steps_per_epoch {
            let batch = if options.shuffle_batches {
                batches.pop().ok_or_else(|| Error::Worker("epoch buffer ran dry".to_string()))?
            } else {
                next_batch(train)?
            };
            let loss = model.train_on_batch(&batch);
            if callbacks.nan.should_terminate(loss) {
                log::warn!("epoch {epoch}, step {step}: invalid loss {loss}, terminating training");
                return Ok(FitHistory {
                    epochs,
                    termination: Termination::NanLoss { epoch, step },
                    final_learning_rate: model.learning_rate(),
                    checkpointed,
                });
            }
            loss_sum += f64::from(loss);
        }
        let loss = loss_sum / options.steps_per_epoch.max(1) as f64;

        let val_loss = match val.as_deref_mut() {
            Some(v) if options.validation_steps > 0 => evaluate(model, v, options.validation_steps)?,
            _ => None,
        };

        let monitored = if options.monitor == "loss" { Some(loss) } else { val_loss };
        if monitored.is_none() && !warned_missing_metric {
            log::warn!(
                "'{}' is unavailable; saving every epoch and skipping plateau / early-stop checks",
                options.monitor
            );
            warned_missing_metric = true;
        }

        let lr = model.learning_rate();
        let decision = callbacks.on_epoch_end(monitored, lr);

        if decision.save_checkpoint {
            artifacts.write_weights(model.weights())?;
            checkpointed = true;
            log::log!(level, "epoch {epoch}: weights saved to {}", artifacts.weights_path.display());
        }
        if let Some(new_lr) = decision.new_learning_rate {
            log::log!(level, "epoch {epoch}: reducing learning rate {lr} -> {new_lr}");
            model.set_learning_rate(new_lr);
        }

        log::log!(
            level,
            "epoch {epoch}/{}: loss {loss:.6}, val_loss {}",
            options.epochs,
            val_loss.map_or_else(|| "n/a".to_string(), |v| format!("{v:.6}"))
        );
        epochs.push(EpochLog {
            epoch,
            loss,
            val_loss,
            learning_rate: lr,
            checkpointed: decision.save_checkpoint,
        });

        if decision.stop {
            log::log!(
                level,
                "epoch {epoch}: no significant improvement in '{}' for {} epochs, stopping",
                options.monitor,
                callbacks.early_stop.patience
            );
            return Ok(FitHistory {
                epochs,
                termination: Termination::EarlyStop { epoch },
                final_learning_rate: model.learning_rate(),
                checkpointed,
            });
        }
    }

    Ok(FitHistory {
        epochs,
        termination: Termination::MaxEpochs,
        final_learning_rate: model.learning_rate(),
        checkpointed,
    })
}
