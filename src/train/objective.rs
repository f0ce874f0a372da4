use serde::{Deserialize, Serialize};

/// Regression loss. Mean absolute error unless configured otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    #[serde(alias = "MAE", alias = "mean_absolute_error")]
    Mae,
    #[serde(alias = "MSE", alias = "mean_squared_error")]
    Mse,
    Huber { delta: f32 },
}

impl Objective {
    pub fn name(&self) -> &'static str {
        match self {
            Objective::Mae => "mae",
            Objective::Mse => "mse",
            Objective::Huber { .. } => "huber",
        }
    }

    /// Loss of a single prediction.
    pub fn loss(&self, pred: f32, target: f32) -> f32 {
        let err = pred - target;
        match *self {
            Objective::Mae => err.abs(),
            Objective::Mse => err * err,
            Objective::Huber { delta } => {
                if err.abs() <= delta {
                    0.5 * err * err
                } else {
                    delta * (err.abs() - 0.5 * delta)
                }
            }
        }
    }

    /// d(loss) / d(pred) of a single prediction.
    pub fn gradient(&self, pred: f32, target: f32) -> f32 {
        let err = pred - target;
        match *self {
            Objective::Mae => {
                if err > 0.0 {
                    1.0
                } else if err < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Objective::Mse => 2.0 * err,
            Objective::Huber { delta } => err.clamp(-delta, delta),
        }
    }

    /// Mean loss over a batch.
    pub fn mean_loss(&self, preds: &[f32], targets: &[f32]) -> f32 {
        if preds.is_empty() {
            return 0.0;
        }
        let total: f32 = preds
            .iter()
            .zip(targets)
            .map(|(&p, &t)| self.loss(p, t))
            .sum();
        total / preds.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_objective_is_mae() {
        assert_eq!(Objective::default(), Objective::Mae);
    }

    #[test]
    fn losses_and_gradients() {
        assert_eq!(Objective::Mae.loss(3.0, 1.0), 2.0);
        assert_eq!(Objective::Mae.gradient(3.0, 1.0), 1.0);
        assert_eq!(Objective::Mse.loss(3.0, 1.0), 4.0);
        assert_eq!(Objective::Mse.gradient(3.0, 1.0), 4.0);
        let huber = Objective::Huber { delta: 1.0 };
        assert_eq!(huber.loss(0.5, 0.0), 0.125);
        assert_eq!(huber.loss(3.0, 0.0), 2.5);
        assert_eq!(huber.gradient(-3.0, 0.0), -1.0);
    }

    #[test]
    fn parses_framework_style_names() {
        let o: Objective = serde_json::from_str("\"MAE\"").unwrap();
        assert_eq!(o, Objective::Mae);
        let o: Objective = serde_json::from_str("\"mean_squared_error\"").unwrap();
        assert_eq!(o, Objective::Mse);
        let o: Objective = serde_json::from_str(r#"{"huber": {"delta": 2.0}}"#).unwrap();
        assert_eq!(o, Objective::Huber { delta: 2.0 });
    }

    #[test]
    fn mean_loss_of_empty_batch_is_zero() {
        assert_eq!(Objective::Mse.mean_loss(&[], &[]), 0.0);
        assert_eq!(Objective::Mae.mean_loss(&[1.0, 3.0], &[0.0, 0.0]), 2.0);
    }
}
