use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One training configuration candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Learning rate for training
    pub learning_rate: f32,

    /// Number of training epochs
    pub epochs: usize,

    /// Batch size for training
    pub batch_size: usize,

    pub momentum: f32,

    /// L2 penalty added to the gradient by the optimizer
    pub weight_decay: f32,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            learning_rate: 0.01,
            epochs: 10,
            batch_size: 32,
            momentum: 0.9,
            weight_decay: 0.0,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be at least 1".into()));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::InvalidConfig(format!("momentum must be in [0, 1), got {}", self.momentum)));
        }
        Ok(())
    }
}

/// Cross product of epoch counts and learning rates; every other field is
/// taken from `base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpace {
    pub epochs: Vec<usize>,
    pub learning_rates: Vec<f32>,
    pub base: Hyperparameters,
}

impl Default for GridSpace {
    fn default() -> Self {
        GridSpace {
            epochs: vec![10, 20],
            learning_rates: vec![0.01, 0.001],
            base: Hyperparameters::default(),
        }
    }
}

impl GridSpace {
    pub fn len(&self) -> usize {
        self.epochs.len() * self.learning_rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidates in search order: epochs outer, learning rate inner.
    pub fn candidates(&self) -> Vec<Hyperparameters> {
        self.epochs
            .iter()
            .flat_map(|&epochs| {
                self.learning_rates.iter().map(move |&learning_rate| Hyperparameters {
                    learning_rate,
                    epochs,
                    ..self.base
                })
            })
            .collect()
    }
}

/// Ranges sampled independently for every random-search trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSpace {
    /// Half-open `[lo, hi)` learning-rate range.
    pub learning_rate: (f32, f32),
    pub batch_sizes: Vec<usize>,
    /// Inclusive epoch range.
    pub epochs: (usize, usize),
    /// Half-open `[lo, hi)` momentum range.
    pub momentum: (f32, f32),
    pub base: Hyperparameters,
}

impl Default for RandomSpace {
    fn default() -> Self {
        RandomSpace {
            learning_rate: (0.001, 0.1),
            batch_sizes: vec![16, 32, 64],
            epochs: (5, 15),
            momentum: (0.8, 0.99),
            base: Hyperparameters::default(),
        }
    }
}

impl RandomSpace {
    pub fn validate(&self) -> Result<()> {
        if self.batch_sizes.is_empty() {
            return Err(Error::EmptySearchSpace);
        }
        let (lr_lo, lr_hi) = self.learning_rate;
        let (m_lo, m_hi) = self.momentum;
        let (e_lo, e_hi) = self.epochs;
        if !(lr_lo < lr_hi) || !(m_lo < m_hi) || e_lo > e_hi {
            return Err(Error::InvalidConfig(format!("empty range in random search space: {:?}", self)));
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Hyperparameters> {
        self.validate()?;
        let batch_size = *self.batch_sizes.choose(rng).ok_or(Error::EmptySearchSpace)?;
        Ok(Hyperparameters {
            learning_rate: rng.random_range(self.learning_rate.0..self.learning_rate.1),
            epochs: rng.random_range(self.epochs.0..=self.epochs.1),
            batch_size,
            momentum: rng.random_range(self.momentum.0..self.momentum.1),
            ..self.base
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_hyperparameters() {
        let hp = Hyperparameters::default();

        assert_eq!(hp.learning_rate, 0.01);
        assert_eq!(hp.epochs, 10);
        assert_eq!(hp.batch_size, 32);
        assert!(hp.validate().is_ok());
    }

    #[test]
    fn test_grid_order_is_epochs_then_learning_rate() {
        let grid = GridSpace {
            epochs: vec![1, 2],
            learning_rates: vec![0.1, 0.01],
            base: Hyperparameters::default(),
        };
        let order: Vec<_> = grid.candidates().iter().map(|h| (h.epochs, h.learning_rate)).collect();
        assert_eq!(order, vec![(1, 0.1), (1, 0.01), (2, 0.1), (2, 0.01)]);
        assert_eq!(grid.len(), 4);
    }

    #[test]
    fn test_random_samples_stay_in_range() {
        let space = RandomSpace::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let hp = space.sample(&mut rng).unwrap();
            assert!((0.001..0.1).contains(&hp.learning_rate));
            assert!((5..=15).contains(&hp.epochs));
            assert!(space.batch_sizes.contains(&hp.batch_size));
            assert!((0.8..0.99).contains(&hp.momentum));
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let hp: Hyperparameters = toml::from_str("learning_rate = 0.5").unwrap();
        assert_eq!(hp.learning_rate, 0.5);
        assert_eq!(hp.batch_size, 32);
    }
}
