use rand::Rng;
use serde::{Deserialize, Serialize};

use super::network::{WindowLinear, WindowMlp, WindowRegressor};
use super::objective::Objective;
use super::queue::QueueReaderTrainer;

/// Names accepted for `model.factory.name`.
pub const CHOICES: &[&str] = &["window_linear", "window_mlp", "queue_reader_mlp"];

fn default_hidden_nodes() -> usize {
    38
}

fn default_lr_decay() -> f64 {
    0.5
}

/// Model factory, selected by name in the configuration.
///
/// Unknown names fail when the configuration is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ModelFactory {
    WindowLinear,
    WindowMlp {
        #[serde(default = "default_hidden_nodes")]
        n_fdfwd_hid_nodes: usize,
    },
    /// Trains through its own epoch loop with a loss-plateau LR decay.
    QueueReaderMlp {
        #[serde(default = "default_hidden_nodes")]
        n_fdfwd_hid_nodes: usize,
        #[serde(default = "default_lr_decay")]
        lr_decay: f64,
    },
}

impl Default for ModelFactory {
    fn default() -> Self {
        ModelFactory::WindowMlp {
            n_fdfwd_hid_nodes: default_hidden_nodes(),
        }
    }
}

/// How a model is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// External epoch loop with callbacks.
    GenericFit,
    /// The model consumes batch sources and runs its own loop.
    QueueReader,
}

/// Window geometry every factory needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputShape {
    pub window_len: usize,
    pub n_features: usize,
    pub mask_value: f32,
}

pub enum BuiltModel {
    Fit(Box<dyn WindowRegressor>),
    QueueReader(QueueReaderTrainer),
}

impl ModelFactory {
    pub fn name(&self) -> &'static str {
        match self {
            ModelFactory::WindowLinear => CHOICES[0],
            ModelFactory::WindowMlp { .. } => CHOICES[1],
            ModelFactory::QueueReaderMlp { .. } => CHOICES[2],
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            ModelFactory::QueueReaderMlp { .. } => Strategy::QueueReader,
            _ => Strategy::GenericFit,
        }
    }

    pub fn build<R: Rng + ?Sized>(
        &self,
        shape: InputShape,
        objective: Objective,
        learning_rate: f64,
        rng: &mut R,
    ) -> BuiltModel {
        let InputShape {
            window_len,
            n_features,
            mask_value,
        } = shape;
        match *self {
            ModelFactory::WindowLinear => BuiltModel::Fit(Box::new(WindowLinear::new(
                window_len, n_features, mask_value, rng,
            ))),
            ModelFactory::WindowMlp { n_fdfwd_hid_nodes } => BuiltModel::Fit(Box::new(
                WindowMlp::new(window_len, n_features, n_fdfwd_hid_nodes, mask_value, rng),
            )),
            ModelFactory::QueueReaderMlp {
                n_fdfwd_hid_nodes,
                lr_decay,
            } => BuiltModel::QueueReader(QueueReaderTrainer::new(
                WindowMlp::new(window_len, n_features, n_fdfwd_hid_nodes, mask_value, rng),
                objective,
                learning_rate,
                lr_decay,
            )),
        }
    }
}
