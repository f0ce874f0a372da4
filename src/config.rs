use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::train::callbacks::MonitorMode;
use crate::train::fit::MONITORABLE;
use crate::train::objective::Objective;
use crate::train::registry::{ModelFactory, Strategy};

// ---------------------------------------------------------------------------
// JobConfig – everything one training run needs
// ---------------------------------------------------------------------------

/// Complete configuration for a training run, usually read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub data: DataParams,
    pub model: ModelParams,
    pub concurrency: ConcurrencySettings,
    pub log: LogSettings,
    /// Parent directory of all model directories.
    pub models_dir: PathBuf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            data: DataParams::default(),
            model: ModelParams::default(),
            concurrency: ConcurrencySettings::default(),
            log: LogSettings::default(),
            models_dir: PathBuf::from("models"),
        }
    }
}

impl JobConfig {
    /// Parse a JSON config file and run the precondition checks.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: JobConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on anything that would otherwise blow up mid-run.
    pub fn validate(&self) -> Result<()> {
        self.concurrency.validate()?;

        if self.data.feature_columns.is_empty() {
            return Err(Error::config("data.feature_columns must not be empty"));
        }
        if self.data.label.var.trim().is_empty() {
            return Err(Error::config("data.label.var must be set"));
        }
        if self.data.feature_columns.contains(&self.data.label.var) {
            log::warn!(
                "label column '{}' is also used as a feature",
                self.data.label.var
            );
        }
        if self.data.max_input_ser_len == 0 {
            return Err(Error::config("data.max_input_ser_len must be at least 1"));
        }

        self.model.train.validate()?;

        // The queue-reader models track their own loss and ignore the monitor.
        let monitor = &self.model.train.val_metric.name;
        if self.model.factory.strategy() == Strategy::GenericFit
            && !MONITORABLE.contains(&monitor.as_str())
        {
            return Err(Error::config(format!(
                "cannot monitor '{monitor}'; expected one of {MONITORABLE:?}"
            )));
        }
        Ok(())
    }

    /// Directory holding this model's structure and weights files.
    pub fn model_dir(&self) -> PathBuf {
        self.models_dir.join(&self.model.name)
    }
}

// ---------------------------------------------------------------------------
// Data parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataParams {
    /// Numeric columns fed to the model, in order.
    pub feature_columns: Vec<String>,
    pub label: LabelParams,
    /// Distance in time steps between the end of the input window and the label row.
    pub pred_horizon_len: usize,
    /// Number of time steps in the input window.
    pub max_input_ser_len: usize,
}

impl Default for DataParams {
    fn default() -> Self {
        Self {
            feature_columns: Vec::new(),
            label: LabelParams::default(),
            pred_horizon_len: 0,
            max_input_ser_len: 1,
        }
    }
}

/// Label column and outlier exclusion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelParams {
    pub var: String,
    pub excl_outliers: bool,
    pub outlier_tails: bool,
    pub outlier_tail_proportion: f64,
    pub lower_outlier_threshold: Option<f64>,
    pub upper_outlier_threshold: Option<f64>,
}

impl Default for LabelParams {
    fn default() -> Self {
        Self {
            var: String::new(),
            excl_outliers: true,
            outlier_tails: true,
            outlier_tail_proportion: 0.005,
            lower_outlier_threshold: None,
            upper_outlier_threshold: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Model parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Model directory name under `models_dir`.
    pub name: String,
    pub factory: ModelFactory,
    pub train: TrainParams,
    pub persist: PersistParams,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            name: "model".to_string(),
            factory: ModelFactory::default(),
            train: TrainParams::default(),
            persist: PersistParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistParams {
    pub struct_file: String,
    pub weights_file: String,
}

impl Default for PersistParams {
    fn default() -> Self {
        Self {
            struct_file: "ModelStruct.json".to_string(),
            weights_file: "ModelWeights.json".to_string(),
        }
    }
}

/// Raw training configuration; counts are derived from it by
/// [`TrainingPlan::derive`](crate::train::plan::TrainingPlan::derive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainParams {
    /// Loss objective. Unset means mean absolute error.
    pub objective: Option<Objective>,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub val_batch_size: usize,
    pub train_proportion: f64,
    pub n_samples_max: u64,
    /// When set, the sample budget is capped at this multiple of the dataset size.
    pub n_samples_max_multiple_of_data_size: Option<f64>,
    pub n_train_samples_per_epoch: u64,
    pub max_n_epochs: u64,
    pub min_n_val_samples_per_epoch: MinValSamples,
    pub reduce_lr_on_plateau: ReduceLrParams,
    pub early_stop: EarlyStopParams,
    pub val_metric: ValMetricParams,
    /// Shuffle the order of batches inside each epoch. Off keeps time order.
    pub shuffle_batches: bool,
    /// Per-class loss weights. Always empty for regression.
    pub class_weight: BTreeMap<String, f64>,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            objective: None,
            learning_rate: 1e-3,
            batch_size: 500,
            val_batch_size: 10_000,
            train_proportion: 0.8,
            n_samples_max: 100_000_000,
            n_samples_max_multiple_of_data_size: Some(3.0),
            n_train_samples_per_epoch: 1_000_000,
            max_n_epochs: 100,
            min_n_val_samples_per_epoch: MinValSamples::AtLeast(100_000),
            reduce_lr_on_plateau: ReduceLrParams::default(),
            early_stop: EarlyStopParams::default(),
            val_metric: ValMetricParams::default(),
            shuffle_batches: false,
            class_weight: BTreeMap::new(),
        }
    }
}

impl TrainParams {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.val_batch_size == 0 {
            return Err(Error::config(format!(
                "batch sizes must be non-zero (batch_size = {}, val_batch_size = {})",
                self.batch_size, self.val_batch_size
            )));
        }
        if !(self.train_proportion > 0.0 && self.train_proportion <= 1.0) {
            return Err(Error::config(format!(
                "train_proportion must be in (0, 1], got {}",
                self.train_proportion
            )));
        }
        if self.n_samples_max == 0 || self.n_train_samples_per_epoch == 0 || self.max_n_epochs == 0 {
            return Err(Error::config(
                "n_samples_max, n_train_samples_per_epoch and max_n_epochs must be non-zero",
            ));
        }
        if let Some(multiple) = self.n_samples_max_multiple_of_data_size {
            if !(multiple > 0.0) {
                return Err(Error::config(format!(
                    "n_samples_max_multiple_of_data_size must be positive, got {multiple}"
                )));
            }
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::config("learning_rate must be positive"));
        }
        if !(self.reduce_lr_on_plateau.factor > 0.0 && self.reduce_lr_on_plateau.factor < 1.0) {
            return Err(Error::config(format!(
                "reduce_lr_on_plateau.factor must be in (0, 1), got {}",
                self.reduce_lr_on_plateau.factor
            )));
        }
        if !self.class_weight.is_empty() {
            log::warn!("class_weight is ignored for regression objectives");
        }
        Ok(())
    }
}

/// How many validation samples to evaluate per epoch.
///
/// Serialized as the string `"all"` or a plain integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub enum MinValSamples {
    /// Every validation sample each epoch; also switches checkpoints to best-only.
    All,
    AtLeast(u64),
}

impl TryFrom<JsonValue> for MinValSamples {
    type Error = String;

    fn try_from(value: JsonValue) -> std::result::Result<Self, Self::Error> {
        match &value {
            JsonValue::String(s) if s.eq_ignore_ascii_case("all") => Ok(MinValSamples::All),
            JsonValue::Number(n) => n
                .as_u64()
                .map(MinValSamples::AtLeast)
                .ok_or_else(|| format!("expected a non-negative integer, got {n}")),
            other => Err(format!("expected \"all\" or an integer, got {other}")),
        }
    }
}

impl From<MinValSamples> for JsonValue {
    fn from(value: MinValSamples) -> Self {
        match value {
            MinValSamples::All => JsonValue::String("all".to_string()),
            MinValSamples::AtLeast(n) => JsonValue::from(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceLrParams {
    pub patience_n_epochs: u64,
    /// `new_lr = lr * factor`
    pub factor: f64,
}

impl Default for ReduceLrParams {
    fn default() -> Self {
        Self {
            patience_n_epochs: 3,
            factor: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStopParams {
    pub patience_min_n_epochs: u64,
    pub patience_proportion_total_n_epochs: f64,
}

impl Default for EarlyStopParams {
    fn default() -> Self {
        Self {
            patience_min_n_epochs: 5,
            patience_proportion_total_n_epochs: 0.32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValMetricParams {
    pub name: String,
    pub mode: MonitorMode,
    /// Minimum change that counts as an improvement.
    pub significance: f64,
}

impl Default for ValMetricParams {
    fn default() -> Self {
        Self {
            name: "val_loss".to_string(),
            mode: MonitorMode::Auto,
            significance: 1e-6,
        }
    }
}

// ---------------------------------------------------------------------------
// Concurrency and logging
// ---------------------------------------------------------------------------

/// Data feeding concurrency for the generic fit strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    /// Bound of the prefetch queue between workers and the fit loop.
    pub gen_queue_size: usize,
    pub n_workers: usize,
    /// Compute devices the model is replicated over.
    pub n_devices: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            gen_queue_size: 99,
            n_workers: 1,
            n_devices: 1,
        }
    }
}

impl ConcurrencySettings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("gen_queue_size", self.gen_queue_size),
            ("n_workers", self.n_workers),
            ("n_devices", self.n_devices),
        ] {
            if value == 0 {
                return Err(Error::config(format!("concurrency.{name} = {value}")));
            }
        }
        Ok(())
    }
}

/// Logging verbosity handed to each component at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub verbose: bool,
}

impl LogSettings {
    pub fn level(&self) -> log::Level {
        if self.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> JobConfig {
        let mut config = JobConfig::default();
        config.data.feature_columns = vec!["x".to_string()];
        config.data.label.var = "y".to_string();
        config
    }

    #[test]
    fn defaults_validate_once_columns_are_set() {
        assert!(JobConfig::default().validate().is_err());
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_parameters_are_rejected() {
        for field in 0..3 {
            let mut config = minimal();
            match field {
                0 => config.concurrency.gen_queue_size = 0,
                1 => config.concurrency.n_workers = 0,
                _ => config.concurrency.n_devices = 0,
            }
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn unknown_monitor_is_rejected_for_generic_fit_only() {
        let mut config = minimal();
        config.model.train.val_metric.name = "val_mape".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.model.factory = ModelFactory::QueueReaderMlp {
            n_fdfwd_hid_nodes: 8,
            lr_decay: 0.5,
        };
        assert!(config.validate().is_ok());

        let mut config = minimal();
        config.model.train.val_metric.name = "loss".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn min_val_samples_parses_keyword_and_count() {
        let all: MinValSamples = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(all, MinValSamples::All);
        let n: MinValSamples = serde_json::from_str("250").unwrap();
        assert_eq!(n, MinValSamples::AtLeast(250));
        assert!(serde_json::from_str::<MinValSamples>("\"some\"").is_err());
        assert_eq!(serde_json::to_string(&MinValSamples::All).unwrap(), "\"all\"");
    }

    #[test]
    fn unknown_model_factory_is_rejected_at_parse_time() {
        let text = r#"{ "model": { "factory": { "name": "no_such_model" } } }"#;
        assert!(serde_json::from_str::<JobConfig>(text).is_err());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let text = r#"{
            "data": { "feature_columns": ["a", "b"], "label": { "var": "y" }, "max_input_ser_len": 4 },
            "model": { "train": { "batch_size": 8, "min_n_val_samples_per_epoch": "all" } }
        }"#;
        let config: JobConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.data.max_input_ser_len, 4);
        assert_eq!(config.model.train.batch_size, 8);
        assert_eq!(config.model.train.val_batch_size, 10_000);
        assert_eq!(config.model.train.min_n_val_samples_per_epoch, MinValSamples::All);
        assert!(config.data.label.excl_outliers);
        assert_eq!(config.model.factory, ModelFactory::default());
        assert!(config.validate().is_ok());
    }
}
