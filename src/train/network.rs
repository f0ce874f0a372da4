use ndarray::Axis;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::objective::Objective;
use crate::data::Batch;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Weights / ModelStructure – what gets persisted
// ---------------------------------------------------------------------------

/// Flat parameter tensors, in a model-defined order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub tensors: Vec<Vec<f32>>,
}

impl Weights {
    pub fn zeros_like(other: &Weights) -> Self {
        Weights {
            tensors: other.tensors.iter().map(|t| vec![0.0; t.len()]).collect(),
        }
    }

    pub fn same_shape(&self, other: &Weights) -> bool {
        self.tensors.len() == other.tensors.len()
            && self
                .tensors
                .iter()
                .zip(&other.tensors)
                .all(|(a, b)| a.len() == b.len())
    }

    /// `self += scale * other`
    pub fn add_scaled(&mut self, other: &Weights, scale: f32) {
        for (a, b) in self.tensors.iter_mut().zip(&other.tensors) {
            for (x, y) in a.iter_mut().zip(b) {
                *x += scale * y;
            }
        }
    }
}

/// Serialized architecture description, written next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStructure {
    pub kind: String,
    pub window_len: usize,
    pub n_features: usize,
    pub hidden_nodes: Option<usize>,
    pub mask_value: f32,
    pub n_devices: usize,
}

// ---------------------------------------------------------------------------
// WindowRegressor – the raw model primitives the fit loop drives
// ---------------------------------------------------------------------------

pub trait WindowRegressor: Send + Sync {
    fn structure(&self) -> ModelStructure;

    fn weights(&self) -> &Weights;

    fn weights_mut(&mut self) -> &mut Weights;

    /// One prediction per example.
    fn predict(&self, batch: &Batch) -> Vec<f32>;

    /// Mean batch loss and its gradient with respect to every weight.
    fn loss_and_gradients(&self, batch: &Batch, objective: Objective) -> (f32, Weights);
}

/// Flatten example `i`, zeroing masked positions.
fn masked_input(batch: &Batch, i: usize, mask_value: f32) -> Vec<f32> {
    batch
        .features
        .index_axis(Axis(0), i)
        .iter()
        .map(|&v| if v == mask_value { 0.0 } else { v })
        .collect()
}

fn check_input(batch: &Batch, window_len: usize, n_features: usize) {
    debug_assert_eq!(batch.window_len(), window_len);
    debug_assert_eq!(batch.n_features(), n_features);
}

// ---------------------------------------------------------------------------
// WindowLinear
// ---------------------------------------------------------------------------

/// Linear model over the flattened window: `w · x + b`.
#[derive(Debug, Clone)]
pub struct WindowLinear {
    window_len: usize,
    n_features: usize,
    mask_value: f32,
    weights: Weights,
}

impl WindowLinear {
    pub fn new<R: Rng + ?Sized>(window_len: usize, n_features: usize, mask_value: f32, rng: &mut R) -> Self {
        let d = window_len * n_features;
        let limit = 1.0 / (d.max(1) as f32).sqrt();
        let w = (0..d).map(|_| rng.random_range(-limit..limit)).collect();
        WindowLinear {
            window_len,
            n_features,
            mask_value,
            weights: Weights {
                tensors: vec![w, vec![0.0]],
            },
        }
    }

    fn forward(&self, x: &[f32]) -> f32 {
        let w = &self.weights.tensors[0];
        let b = self.weights.tensors[1][0];
        w.iter().zip(x).map(|(a, b)| a * b).sum::<f32>() + b
    }
}

impl WindowRegressor for WindowLinear {
    fn structure(&self) -> ModelStructure {
        ModelStructure {
            kind: "window_linear".to_string(),
            window_len: self.window_len,
            n_features: self.n_features,
            hidden_nodes: None,
            mask_value: self.mask_value,
            n_devices: 1,
        }
    }

    fn weights(&self) -> &Weights {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut Weights {
        &mut self.weights
    }

    fn predict(&self, batch: &Batch) -> Vec<f32> {
        check_input(batch, self.window_len, self.n_features);
        (0..batch.len())
            .map(|i| self.forward(&masked_input(batch, i, self.mask_value)))
            .collect()
    }

    fn loss_and_gradients(&self, batch: &Batch, objective: Objective) -> (f32, Weights) {
        check_input(batch, self.window_len, self.n_features);
        let mut grads = Weights::zeros_like(&self.weights);
        let n = batch.len().max(1) as f32;
        let mut total = 0.0;
        for i in 0..batch.len() {
            let x = masked_input(batch, i, self.mask_value);
            let pred = self.forward(&x);
            let target = batch.labels[i];
            total += objective.loss(pred, target);
            let g = objective.gradient(pred, target) / n;
            for (dw, xj) in grads.tensors[0].iter_mut().zip(&x) {
                *dw += g * xj;
            }
            grads.tensors[1][0] += g;
        }
        (total / n, grads)
    }
}

// ---------------------------------------------------------------------------
// WindowMlp
// ---------------------------------------------------------------------------

/// One tanh hidden layer over the flattened window.
///
/// Tensor order: hidden weights `[hidden, d]`, hidden bias, output weights, output bias.
#[derive(Debug, Clone)]
pub struct WindowMlp {
    window_len: usize,
    n_features: usize,
    hidden: usize,
    mask_value: f32,
    weights: Weights,
}

impl WindowMlp {
    pub fn new<R: Rng + ?Sized>(
        window_len: usize,
        n_features: usize,
        hidden: usize,
        mask_value: f32,
        rng: &mut R,
    ) -> Self {
        let d = window_len * n_features;
        let hidden = hidden.max(1);
        let l1 = (6.0 / (d + hidden) as f32).sqrt();
        let l2 = (6.0 / (hidden + 1) as f32).sqrt();
        let w1 = (0..hidden * d).map(|_| rng.random_range(-l1..l1)).collect();
        let w2 = (0..hidden).map(|_| rng.random_range(-l2..l2)).collect();
        WindowMlp {
            window_len,
            n_features,
            hidden,
            mask_value,
            weights: Weights {
                tensors: vec![w1, vec![0.0; hidden], w2, vec![0.0]],
            },
        }
    }

    fn d(&self) -> usize {
        self.window_len * self.n_features
    }

    /// Hidden activations and output.
    fn forward(&self, x: &[f32]) -> (Vec<f32>, f32) {
        let [w1, b1, w2, b2] = &self.weights.tensors[..] else {
            unreachable!("WindowMlp always holds four tensors")
        };
        let d = self.d();
        let act: Vec<f32> = (0..self.hidden)
            .map(|k| {
                let row = &w1[k * d..(k + 1) * d];
                let z: f32 = row.iter().zip(x).map(|(a, b)| a * b).sum::<f32>() + b1[k];
                z.tanh()
            })
            .collect();
        let out = act.iter().zip(w2).map(|(a, w)| a * w).sum::<f32>() + b2[0];
        (act, out)
    }
}

impl WindowRegressor for WindowMlp {
    fn structure(&self) -> ModelStructure {
        ModelStructure {
            kind: "window_mlp".to_string(),
            window_len: self.window_len,
            n_features: self.n_features,
            hidden_nodes: Some(self.hidden),
            mask_value: self.mask_value,
            n_devices: 1,
        }
    }

    fn weights(&self) -> &Weights {
        &self.weights
    }

    fn weights_mut(&mut self) -> &mut Weights {
        &mut self.weights
    }

    fn predict(&self, batch: &Batch) -> Vec<f32> {
        check_input(batch, self.window_len, self.n_features);
        (0..batch.len())
            .map(|i| self.forward(&masked_input(batch, i, self.mask_value)).1)
            .collect()
    }

    fn loss_and_gradients(&self, batch: &Batch, objective: Objective) -> (f32, Weights) {
        check_input(batch, self.window_len, self.n_features);
        let d = self.d();
        let w2 = &self.weights.tensors[2];
        let mut grads = Weights::zeros_like(&self.weights);
        let n = batch.len().max(1) as f32;
        let mut total = 0.0;

        for i in 0..batch.len() {
            let x = masked_input(batch, i, self.mask_value);
            let (act, pred) = self.forward(&x);
            let target = batch.labels[i];
            total += objective.loss(pred, target);
            let g = objective.gradient(pred, target) / n;

            grads.tensors[3][0] += g;
            for k in 0..self.hidden {
                grads.tensors[2][k] += g * act[k];
                let dz = g * w2[k] * (1.0 - act[k] * act[k]);
                grads.tensors[1][k] += dz;
                let row = &mut grads.tensors[0][k * d..(k + 1) * d];
                for (dw, xj) in row.iter_mut().zip(&x) {
                    *dw += dz * xj;
                }
            }
        }
        (total / n, grads)
    }
}

// ---------------------------------------------------------------------------
// Replicated – data-parallel wrapper across compute devices
// ---------------------------------------------------------------------------

/// Splits every batch into one shard per device, computes shard gradients
/// concurrently and merges them weighted by shard size.
pub struct Replicated {
    inner: Box<dyn WindowRegressor>,
    n_devices: usize,
}

impl Replicated {
    pub fn new(inner: Box<dyn WindowRegressor>, n_devices: usize) -> Self {
        Replicated {
            inner,
            n_devices: n_devices.max(1),
        }
    }

    pub fn n_devices(&self) -> usize {
        self.n_devices
    }
}

impl WindowRegressor for Replicated {
    fn structure(&self) -> ModelStructure {
        ModelStructure {
            n_devices: self.n_devices,
            ..self.inner.structure()
        }
    }

    fn weights(&self) -> &Weights {
        self.inner.weights()
    }

    fn weights_mut(&mut self) -> &mut Weights {
        self.inner.weights_mut()
    }

    fn predict(&self, batch: &Batch) -> Vec<f32> {
        self.inner.predict(batch)
    }

    fn loss_and_gradients(&self, batch: &Batch, objective: Objective) -> (f32, Weights) {
        let shards = batch.shards(self.n_devices);
        if shards.len() <= 1 {
            return self.inner.loss_and_gradients(batch, objective);
        }

        let inner: &dyn WindowRegressor = self.inner.as_ref();
        let results: Vec<(usize, f32, Weights)> = std::thread::scope(|scope| {
            let handles: Vec<_> = shards
                .iter()
                .map(|shard| {
                    scope.spawn(move || {
                        let (loss, grads) = inner.loss_and_gradients(shard, objective);
                        (shard.len(), loss, grads)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        });

        let total = batch.len() as f32;
        let mut merged = Weights::zeros_like(self.inner.weights());
        let mut loss = 0.0;
        for (len, shard_loss, grads) in &results {
            let share = *len as f32 / total;
            loss += share * shard_loss;
            merged.add_scaled(grads, share);
        }
        (loss, merged)
    }
}

// ---------------------------------------------------------------------------
// Nadam + CompiledModel
// ---------------------------------------------------------------------------

/// Adam with Nesterov momentum.
#[derive(Debug, Clone)]
pub struct Nadam {
    pub learning_rate: f64,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    m: Option<Weights>,
    v: Option<Weights>,
}

impl Nadam {
    pub fn new(learning_rate: f64) -> Self {
        Nadam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m: None,
            v: None,
        }
    }

    pub fn apply(&mut self, weights: &mut Weights, grads: &Weights) {
        let m = self.m.get_or_insert_with(|| Weights::zeros_like(grads));
        let v = self.v.get_or_insert_with(|| Weights::zeros_like(grads));
        self.step += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        let bias1 = 1.0 - b1.powi(self.step);
        let bias1_next = 1.0 - b1.powi(self.step + 1);
        let bias2 = 1.0 - b2.powi(self.step);
        let lr = self.learning_rate as f32;

        for (((w, g), m), v) in weights
            .tensors
            .iter_mut()
            .zip(&grads.tensors)
            .zip(m.tensors.iter_mut())
            .zip(v.tensors.iter_mut())
        {
            for j in 0..w.len() {
                m[j] = b1 * m[j] + (1.0 - b1) * g[j];
                v[j] = b2 * v[j] + (1.0 - b2) * g[j] * g[j];
                let m_hat = b1 * m[j] / bias1_next + (1.0 - b1) * g[j] / bias1;
                let v_hat = v[j] / bias2;
                w[j] -= lr * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
    }
}

/// A model bound to a loss objective and an optimizer.
pub struct CompiledModel {
    net: Box<dyn WindowRegressor>,
    objective: Objective,
    optimizer: Nadam,
}

impl CompiledModel {
    pub fn compile(net: Box<dyn WindowRegressor>, objective: Objective, learning_rate: f64) -> Self {
        CompiledModel {
            net,
            objective,
            optimizer: Nadam::new(learning_rate),
        }
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// One optimizer step; returns the batch loss. Non-finite losses are not applied.
    pub fn train_on_batch(&mut self, batch: &Batch) -> f32 {
        let (loss, grads) = self.net.loss_and_gradients(batch, self.objective);
        if loss.is_finite() {
            self.optimizer.apply(self.net.weights_mut(), &grads);
        }
        loss
    }

    pub fn test_on_batch(&self, batch: &Batch) -> f32 {
        let preds = self.net.predict(batch);
        let labels = batch.labels.to_vec();
        self.objective.mean_loss(&preds, &labels)
    }

    pub fn predict(&self, batch: &Batch) -> Vec<f32> {
        self.net.predict(batch)
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.learning_rate = lr;
    }

    pub fn structure(&self) -> ModelStructure {
        self.net.structure()
    }

    pub fn weights(&self) -> &Weights {
        self.net.weights()
    }

    pub fn set_weights(&mut self, weights: Weights) -> Result<()> {
        if !self.net.weights().same_shape(&weights) {
            return Err(Error::config("weights do not match the model structure"));
        }
        *self.net.weights_mut() = weights;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Example, MASK_VALUE};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// label = 2 * last feature + 1, one feature, window of 2.
    fn linear_batch(n: usize) -> Batch {
        let examples = (0..n)
            .map(|i| {
                let x = (i % 7) as f32 / 7.0;
                Example {
                    window: vec![MASK_VALUE, x],
                    label: 2.0 * x + 1.0,
                }
            })
            .collect();
        Batch::from_examples(examples, 2, 1).unwrap()
    }

    fn numeric_gradient(net: &mut dyn WindowRegressor, batch: &Batch, t: usize, j: usize) -> f32 {
        let eps = 1e-3;
        net.weights_mut().tensors[t][j] += eps;
        let (up, _) = net.loss_and_gradients(batch, Objective::Mse);
        net.weights_mut().tensors[t][j] -= 2.0 * eps;
        let (down, _) = net.loss_and_gradients(batch, Objective::Mse);
        net.weights_mut().tensors[t][j] += eps;
        (up - down) / (2.0 * eps)
    }

    #[test]
    fn mlp_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut net = WindowMlp::new(2, 1, 3, MASK_VALUE, &mut rng);
        let batch = linear_batch(5);
        let (_, grads) = net.loss_and_gradients(&batch, Objective::Mse);
        for (t, j) in [(0, 1), (1, 2), (2, 0), (3, 0)] {
            let numeric = numeric_gradient(&mut net, &batch, t, j);
            assert!(
                (numeric - grads.tensors[t][j]).abs() < 1e-2,
                "tensor {t}[{j}]: analytic {} vs numeric {numeric}",
                grads.tensors[t][j]
            );
        }
    }

    #[test]
    fn masked_positions_do_not_contribute() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = WindowLinear::new(2, 1, MASK_VALUE, &mut rng);
        let (_, grads) = net.loss_and_gradients(&linear_batch(4), Objective::Mae);
        assert_eq!(grads.tensors[0][0], 0.0);
    }

    #[test]
    fn linear_model_learns_a_line() {
        let mut rng = StdRng::seed_from_u64(5);
        let net = WindowLinear::new(2, 1, MASK_VALUE, &mut rng);
        let mut model = CompiledModel::compile(Box::new(net), Objective::Mse, 0.05);
        let batch = linear_batch(28);
        let before = model.test_on_batch(&batch);
        for _ in 0..500 {
            model.train_on_batch(&batch);
        }
        let after = model.test_on_batch(&batch);
        assert!(after < before * 0.05, "before {before}, after {after}");
    }

    #[test]
    fn replicated_gradients_equal_single_device() {
        let mut rng = StdRng::seed_from_u64(9);
        let net = WindowMlp::new(2, 1, 4, MASK_VALUE, &mut rng);
        let batch = linear_batch(10);
        let (loss1, g1) = net.loss_and_gradients(&batch, Objective::Mae);
        let replicated = Replicated::new(Box::new(net), 3);
        let (loss3, g3) = replicated.loss_and_gradients(&batch, Objective::Mae);
        assert!((loss1 - loss3).abs() < 1e-5);
        for (a, b) in g1.tensors.iter().flatten().zip(g3.tensors.iter().flatten()) {
            assert!((a - b).abs() < 1e-5);
        }
        assert_eq!(replicated.structure().n_devices, 3);
    }

    #[test]
    fn set_weights_checks_shape() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut model = CompiledModel::compile(
            Box::new(WindowLinear::new(2, 1, MASK_VALUE, &mut rng)),
            Objective::Mae,
            0.01,
        );
        let bad = Weights {
            tensors: vec![vec![0.0; 3]],
        };
        assert!(model.set_weights(bad).is_err());
        let good = Weights::zeros_like(model.weights());
        assert!(model.set_weights(good).is_ok());
    }
}
