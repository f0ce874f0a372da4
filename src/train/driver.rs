use std::path::PathBuf;

use serde::Serialize;

use super::callbacks::{
    EarlyStopping, EpochCallbacks, ModelCheckpoint, ReduceLrOnPlateau, TerminateOnNan,
};
use super::fit::{FitHistory, FitOptions, Termination, fit};
use super::network::{CompiledModel, Replicated, WindowRegressor};
use super::objective::Objective;
use super::persist::ModelArtifacts;
use super::plan::TrainingPlan;
use super::queue::{QueueReaderModel, QueueReaderTrainer, QueueRun};
use super::registry::{BuiltModel, InputShape, Strategy};
use super::schedule::LossPlateauLrDecay;
use crate::config::{JobConfig, MinValSamples};
use crate::data::{
    BatchGenerator, GeneratorSpec, LabelFilter, MASK_VALUE, PartitionSplit, PartitionedDataset,
    PrefetchSettings, Prefetcher, WindowOffsets, assert_transferable, split_partitions,
};
use crate::error::Result;

/// Outcome of one training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub model_name: String,
    pub factory: &'static str,
    pub strategy: Strategy,
    pub plan: TrainingPlan,
    pub split: PartitionSplit,
    /// Outlier condition applied to the label, if any.
    pub filter_condition: Option<String>,
    pub history: FitHistory,
    pub artifacts: ModelArtifacts,
}

/// Runs one configured training job against a partitioned dataset.
pub struct TrainingDriver {
    config: JobConfig,
}

impl TrainingDriver {
    pub fn new(config: JobConfig) -> Result<Self> {
        config.validate()?;
        Ok(TrainingDriver { config })
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Split, build generators and the model, train, persist.
    pub fn run(&self, dataset: &PartitionedDataset) -> Result<TrainingReport> {
        let cfg = &self.config;
        let params = &cfg.model.train;
        let level = cfg.log.level();

        let label_filter = LabelFilter::from_params(&cfg.data.label, &cfg.log);

        let data_size = match params.n_samples_max_multiple_of_data_size {
            Some(_) => Some(dataset.size_hint()?),
            None => None,
        };
        let split = split_partitions(dataset.partition_paths(), params.train_proportion)?;
        let mut plan = TrainingPlan::derive(params, data_size)?;
        if split.val.is_empty() {
            plan = plan.without_validation();
        }

        let window = WindowOffsets::for_horizon(cfg.data.pred_horizon_len, cfg.data.max_input_ser_len);
        let shape = InputShape {
            window_len: window.len(),
            n_features: cfg.data.feature_columns.len(),
            mask_value: MASK_VALUE,
        };

        log::log!(
            level,
            "TRAIN: {} ({}): input vector size {} x {} = {}",
            cfg.model.name,
            cfg.model.factory.name(),
            shape.window_len,
            shape.n_features,
            shape.window_len * shape.n_features
        );
        log::log!(
            level,
            "TRAIN: {} samples ({} train / {} val) over {} partitions ({} train / {} val)",
            plan.n_samples(),
            plan.n_train_samples(),
            plan.n_val_samples(),
            dataset.n_partitions(),
            split.train.len(),
            split.val.len()
        );
        log::log!(
            level,
            "TRAIN: {} epochs x {} batches of {} ({} samples); validation {} batches of {} ({} samples)",
            plan.n_epochs(),
            plan.n_train_batches_per_epoch(),
            params.batch_size,
            plan.n_train_samples_per_epoch(),
            plan.n_val_batches_per_epoch(),
            params.val_batch_size,
            plan.n_val_samples_per_epoch()
        );
        log::log!(
            level,
            "TRAIN: queue size {}, {} workers, {} devices, early-stop patience {}",
            cfg.concurrency.gen_queue_size,
            cfg.concurrency.n_workers,
            cfg.concurrency.n_devices,
            plan.early_stop_patience()
        );

        let objective = params.objective.unwrap_or_default();
        let artifacts = ModelArtifacts::new(&cfg.model_dir(), &cfg.model.persist);
        let mut rng = rand::rng();

        let runner = Runner {
            config: cfg,
            dataset,
            window,
            label_filter: &label_filter,
            plan,
            split: &split,
            artifacts: &artifacts,
        };
        let history = match cfg.model.factory.build(shape, objective, params.learning_rate, &mut rng) {
            BuiltModel::QueueReader(trainer) => runner.queue_reader(trainer)?,
            BuiltModel::Fit(net) => runner.generic_fit(net, objective)?,
        };

        log::log!(
            level,
            "TRAIN: finished after {} epochs ({:?}); model saved to {}",
            history.epochs.len(),
            history.termination,
            artifacts.dir.display()
        );

        Ok(TrainingReport {
            model_name: cfg.model.name.clone(),
            factory: cfg.model.factory.name(),
            strategy: cfg.model.factory.strategy(),
            plan,
            filter_condition: label_filter.condition(),
            split,
            history,
            artifacts,
        })
    }
}

// ---------------------------------------------------------------------------
// Strategy runners
// ---------------------------------------------------------------------------

struct Runner<'a> {
    config: &'a JobConfig,
    dataset: &'a PartitionedDataset,
    window: WindowOffsets,
    label_filter: &'a LabelFilter,
    plan: TrainingPlan,
    split: &'a PartitionSplit,
    artifacts: &'a ModelArtifacts,
}

impl Runner<'_> {
    fn generator(&self, partitions: &[PathBuf], batch_size: usize, n_threads: usize) -> Result<BatchGenerator> {
        let spec = GeneratorSpec::new(
            self.config.data.feature_columns.clone(),
            self.window,
            self.config.data.label.var.clone(),
            partitions.to_vec(),
            batch_size,
        )
        .with_filter(self.label_filter.to_row_filter())
        .with_threads(n_threads);
        self.dataset.generate(spec)
    }

    /// The model owns its loop; it gets raw generators and a loss-plateau schedule.
    fn queue_reader(&self, mut trainer: QueueReaderTrainer) -> Result<FitHistory> {
        let params = &self.config.model.train;
        let n_threads = logical_cpus().saturating_sub(2).max(1);

        let train_gen = self.generator(&self.split.train, params.batch_size, n_threads)?;
        let val_gen = if self.plan.n_val_batches_per_epoch() > 0 {
            Some(self.generator(&self.split.val, params.val_batch_size, n_threads)?)
        } else {
            None
        };

        let scheduler = LossPlateauLrDecay::new(
            trainer.learning_rate(),
            trainer.lr_decay(),
            params.reduce_lr_on_plateau.patience_n_epochs,
        );
        let run = QueueRun {
            max_epoch: self.plan.n_epochs(),
            early_stopping_patience: self.plan.early_stop_patience(),
            num_train_batches_per_epoch: self.plan.n_train_batches_per_epoch(),
            num_test_batches_per_epoch: self.plan.n_val_batches_per_epoch(),
        };
        let history = trainer.train(&train_gen, val_gen.as_ref(), scheduler, run)?;

        self.artifacts.prepare()?;
        self.artifacts.write_structure(&trainer.structure())?;
        self.artifacts.write_weights(trainer.weights())?;
        Ok(history)
    }

    /// External epoch loop fed by prefetch workers, with the four epoch callbacks.
    fn generic_fit(&self, net: Box<dyn WindowRegressor>, objective: Objective) -> Result<FitHistory> {
        let cfg = self.config;
        let params = &cfg.model.train;
        let concurrency = &cfg.concurrency;

        let net: Box<dyn WindowRegressor> = if concurrency.n_devices > 1 {
            Box::new(Replicated::new(net, concurrency.n_devices))
        } else {
            net
        };
        let mut model = CompiledModel::compile(net, objective, params.learning_rate);

        self.artifacts.prepare()?;
        self.artifacts.write_structure(&model.structure())?;

        let n_threads = logical_cpus().div_ceil(concurrency.n_workers);
        let train_gen = self.generator(
            &self.split.train,
            concurrency.n_devices * params.batch_size,
            n_threads,
        )?;
        assert_transferable(&train_gen)?;
        let val_gen = if self.plan.n_val_batches_per_epoch() > 0 {
            let g = self.generator(
                &self.split.val,
                concurrency.n_devices * params.val_batch_size,
                n_threads,
            )?;
            assert_transferable(&g)?;
            Some(g)
        } else {
            None
        };

        let prefetch = PrefetchSettings {
            max_queue_size: concurrency.gen_queue_size,
            n_workers: concurrency.n_workers,
        };
        let mut train_feed = Prefetcher::spawn(&train_gen, prefetch)?;
        let mut val_feed = val_gen
            .as_ref()
            .map(|g| Prefetcher::spawn(g, prefetch))
            .transpose()?;

        let metric = &params.val_metric;
        let direction = metric.mode.direction(&metric.name);
        let best_only = params.min_n_val_samples_per_epoch == MinValSamples::All;
        let mut callbacks = EpochCallbacks {
            nan: TerminateOnNan,
            checkpoint: ModelCheckpoint::new(direction, best_only),
            reduce_lr: ReduceLrOnPlateau::new(
                direction,
                metric.significance,
                params.reduce_lr_on_plateau.patience_n_epochs,
                params.reduce_lr_on_plateau.factor,
            ),
            early_stop: EarlyStopping::new(
                direction,
                metric.significance,
                self.plan.early_stop_patience(),
            ),
        };
        let options = FitOptions {
            epochs: self.plan.n_epochs(),
            steps_per_epoch: self.plan.n_train_batches_per_epoch(),
            validation_steps: self.plan.n_val_batches_per_epoch(),
            monitor: metric.name.clone(),
            shuffle_batches: params.shuffle_batches,
            log: cfg.log,
        };

        let history = fit(
            &mut model,
            &mut train_feed,
            val_feed.as_mut(),
            &options,
            &mut callbacks,
            self.artifacts,
        )?;
        drop(train_feed);
        drop(val_feed);

        save_final_weights(&mut model, &history, best_only, self.artifacts)?;
        self.artifacts.write_structure(&model.structure())?;
        Ok(history)
    }
}

/// Persist the weights a finished fit should leave behind.
///
/// After a non-finite loss an existing checkpoint is kept as is. In best-only
/// mode the checkpointed weights are reloaded into the model first.
fn save_final_weights(
    model: &mut CompiledModel,
    history: &FitHistory,
    best_only: bool,
    artifacts: &ModelArtifacts,
) -> Result<()> {
    match history.termination {
        Termination::NanLoss { .. } if history.checkpointed => Ok(()),
        _ => {
            if best_only && history.checkpointed {
                model.set_weights(artifacts.read_weights()?)?;
            }
            artifacts.write_weights(model.weights())
        }
    }
}

fn logical_cpus() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistParams;
    use crate::train::network::{WindowLinear, Weights};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model() -> CompiledModel {
        let mut rng = StdRng::seed_from_u64(11);
        CompiledModel::compile(
            Box::new(WindowLinear::new(2, 1, MASK_VALUE, &mut rng)),
            Objective::Mae,
            0.01,
        )
    }

    fn history(termination: Termination, checkpointed: bool) -> FitHistory {
        FitHistory {
            epochs: Vec::new(),
            termination,
            final_learning_rate: 0.01,
            checkpointed,
        }
    }

    fn shifted(weights: &Weights, by: f32) -> Weights {
        let mut w = weights.clone();
        w.tensors[1][0] += by;
        w
    }

    #[test]
    fn checkpoint_survives_a_nan_termination() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::new(dir.path(), &PersistParams::default());
        artifacts.prepare().unwrap();

        let mut m = model();
        let saved = m.weights().clone();
        artifacts.write_weights(&saved).unwrap();
        m.set_weights(shifted(&saved, 3.0)).unwrap();

        let nan = history(Termination::NanLoss { epoch: 2, step: 5 }, true);
        save_final_weights(&mut m, &nan, false, &artifacts).unwrap();
        assert_eq!(artifacts.read_weights().unwrap(), saved);
    }

    #[test]
    fn nan_without_checkpoint_still_saves_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::new(dir.path(), &PersistParams::default());
        artifacts.prepare().unwrap();

        let mut m = model();
        let nan = history(Termination::NanLoss { epoch: 1, step: 0 }, false);
        save_final_weights(&mut m, &nan, true, &artifacts).unwrap();
        assert_eq!(artifacts.read_weights().unwrap(), *m.weights());
    }

    #[test]
    fn best_only_reloads_the_checkpoint_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::new(dir.path(), &PersistParams::default());
        artifacts.prepare().unwrap();

        let mut m = model();
        let best = m.weights().clone();
        artifacts.write_weights(&best).unwrap();
        let last = shifted(&best, 1.5);

        m.set_weights(last.clone()).unwrap();
        save_final_weights(&mut m, &history(Termination::MaxEpochs, true), true, &artifacts).unwrap();
        assert_eq!(*m.weights(), best);
        assert_eq!(artifacts.read_weights().unwrap(), best);

        m.set_weights(last.clone()).unwrap();
        save_final_weights(&mut m, &history(Termination::EarlyStop { epoch: 4 }, true), false, &artifacts)
            .unwrap();
        assert_eq!(artifacts.read_weights().unwrap(), last);
    }
}
