use serde::{Deserialize, Serialize};

/// Learning-rate schedule used by the queue-reader trainer.
///
/// The rate is multiplied by `decay_rate` whenever the epoch loss has not
/// improved for `patience` consecutive epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossPlateauLrDecay {
    pub learning_rate: f64,
    pub decay_rate: f64,
    pub patience: u64,
    #[serde(skip)]
    best_loss: Option<f64>,
    #[serde(skip)]
    wait: u64,
}

impl LossPlateauLrDecay {
    pub fn new(learning_rate: f64, decay_rate: f64, patience: u64) -> Self {
        LossPlateauLrDecay {
            learning_rate,
            decay_rate,
            patience,
            best_loss: None,
            wait: 0,
        }
    }

    /// Feed the loss of the finished epoch; returns the rate for the next one.
    pub fn step(&mut self, loss: f64) -> f64 {
        let improved = self.best_loss.is_none_or(|best| loss < best);
        if improved {
            self.best_loss = Some(loss);
            self.wait = 0;
        } else {
            self.wait += 1;
            if self.wait >= self.patience {
                self.learning_rate *= self.decay_rate;
                self.wait = 0;
                log::debug!("loss plateau: learning rate decayed to {}", self.learning_rate);
            }
        }
        self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decays_after_patience_and_resets() {
        let mut s = LossPlateauLrDecay::new(1.0, 0.5, 2);
        assert_eq!(s.step(10.0), 1.0);
        assert_eq!(s.step(11.0), 1.0);
        assert_eq!(s.step(12.0), 0.5);
        assert_eq!(s.step(9.0), 0.5);
        assert_eq!(s.step(9.5), 0.5);
        assert_eq!(s.step(9.5), 0.25);
    }
}
