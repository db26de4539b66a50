use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::layers::Mode;
use crate::loss::Loss;
use crate::models::Network;
use crate::optimizer::{clip_grad_norm, Optimizer};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Stop after this many consecutive epochs without a lower validation loss.
    pub patience: Option<usize>,
    /// Ceiling on the global L2 norm of the gradients.
    pub clip_norm: Option<f32>,
    pub shuffle: bool,
    /// Batches with fewer samples are skipped. BatchNorm needs at least 2.
    pub min_batch: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 10,
            batch_size: 32,
            patience: None,
            clip_norm: None,
            shuffle: true,
            min_batch: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub val_loss: f32,
    pub val_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochStats>,
    pub stopped_early: bool,
    pub best_val_loss: f32,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

/// Mean loss and hit count of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub correct: usize,
    pub total: usize,
}

impl Evaluation {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Per-sample outputs of an evaluation pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predictions {
    /// Positive-class probability for binary losses, probability of the
    /// predicted class otherwise.
    pub scores: Vec<f64>,
    pub classes: Vec<usize>,
    pub labels: Vec<usize>,
}

/// Trains `network` on `train`, evaluating on `val` after every epoch.
pub fn fit<N, R>(
    network: &mut N,
    optimizer: &mut Optimizer,
    loss: Loss,
    train: &Dataset,
    val: &Dataset,
    config: &TrainConfig,
    rng: &mut R,
) -> Result<TrainingHistory>
where
    N: Network + ?Sized,
    R: Rng + ?Sized,
{
    if config.batch_size == 0 {
        return Err(Error::InvalidConfig("batch size must be at least 1".into()));
    }
    if train.is_empty() {
        return Err(Error::InsufficientData("training set is empty".into()));
    }

    let mut history = TrainingHistory {
        epochs: Vec::with_capacity(config.epochs),
        stopped_early: false,
        best_val_loss: f32::INFINITY,
    };
    let mut wait = 0;

    for epoch in 1..=config.epochs {
        let order = train.order(config.shuffle, rng);
        let mut loss_sum = 0.0f32;
        let mut seen = 0usize;

        for (step, batch) in train.batches(config.batch_size, &order).enumerate() {
            if batch.len() < config.min_batch {
                continue;
            }
            network.zero_grad();
            let logits = network.forward(&batch.features, Mode::Train)?;
            let batch_loss = loss.calculate(&logits, &batch.labels)?;
            if !batch_loss.is_finite() {
                return Err(Error::NonFiniteLoss { epoch });
            }
            let grad = loss.gradient(&logits, &batch.labels)?;
            network.backward(&grad)?;

            let mut params = network.parameters_mut();
            if let Some(max_norm) = config.clip_norm {
                clip_grad_norm(&mut params, max_norm);
            }
            optimizer.step(&mut params);

            loss_sum += batch_loss * batch.len() as f32;
            seen += batch.len();
            debug!(epoch, step, loss = batch_loss, "batch");
        }

        if seen == 0 {
            return Err(Error::InsufficientData(format!(
                "no training batch reaches {} samples with {} training samples",
                config.min_batch,
                train.len()
            )));
        }
        let train_loss = loss_sum / seen as f32;
        let eval = evaluate(network, loss, val, config.batch_size)?;
        let stats = EpochStats {
            epoch,
            train_loss,
            val_loss: eval.loss,
            val_accuracy: eval.accuracy(),
        };
        info!(
            epoch,
            train_loss = stats.train_loss,
            val_loss = stats.val_loss,
            val_accuracy = stats.val_accuracy,
            "epoch finished"
        );
        history.epochs.push(stats);

        if eval.loss < history.best_val_loss {
            history.best_val_loss = eval.loss;
            wait = 0;
        } else {
            wait += 1;
        }
        if let Some(patience) = config.patience {
            if wait >= patience {
                info!(epoch, patience, best_val_loss = history.best_val_loss, "early stopping");
                history.stopped_early = true;
                break;
            }
        }
    }

    Ok(history)
}

/// One pass over `data` in eval mode: no parameter or running-statistic updates.
pub fn evaluate<N>(network: &mut N, loss: Loss, data: &Dataset, batch_size: usize) -> Result<Evaluation>
where
    N: Network + ?Sized,
{
    let order: Vec<usize> = (0..data.len()).collect();
    let mut loss_sum = 0.0f32;
    let mut correct = 0;
    for batch in data.batches(batch_size, &order) {
        let logits = network.forward(&batch.features, Mode::Eval)?;
        loss_sum += loss.calculate(&logits, &batch.labels)? * batch.len() as f32;
        correct += loss
            .predict_classes(&logits)
            .iter()
            .zip(batch.labels.iter())
            .filter(|(p, y)| p == y)
            .count();
    }
    let total = data.len();
    Ok(Evaluation {
        loss: if total == 0 { 0.0 } else { loss_sum / total as f32 },
        correct,
        total,
    })
}

pub fn predict<N>(network: &mut N, loss: Loss, data: &Dataset, batch_size: usize) -> Result<Predictions>
where
    N: Network + ?Sized,
{
    let order: Vec<usize> = (0..data.len()).collect();
    let mut predictions = Predictions::default();
    for batch in data.batches(batch_size, &order) {
        let logits = network.forward(&batch.features, Mode::Eval)?;
        let probs = loss.probabilities(&logits);
        let classes = loss.predict_classes(&logits);
        for (row, &class) in probs.outer_iter().zip(&classes) {
            let score = match loss {
                Loss::BinaryCrossEntropy => row[0],
                Loss::CrossEntropy => row[class],
            };
            predictions.scores.push(score as f64);
        }
        predictions.classes.extend(classes);
        predictions.labels.extend(batch.labels.iter().copied());
    }
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Tensor;
    use crate::models::Perceptron;
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn separable(n: usize) -> Dataset {
        let features = Tensor::from_shape_fn(vec![n, 2], |d| {
            let x = d[0] as f32 / n as f32 - 0.5;
            if d[1] == 0 {
                x
            } else {
                -x * 0.5
            }
        });
        let labels = Array1::from_shape_fn(n, |i| usize::from(i >= n / 2));
        Dataset::new(features, labels).unwrap()
    }

    #[test]
    fn test_equal_validation_losses_stop_early() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Perceptron::new(2, &mut rng);
        let data = separable(20);
        // a zero learning rate keeps the validation loss exactly constant
        let mut optimizer = Optimizer::new(0.0);
        let config = TrainConfig {
            epochs: 10,
            batch_size: 4,
            patience: Some(2),
            ..TrainConfig::default()
        };
        let history =
            fit(&mut model, &mut optimizer, Loss::BinaryCrossEntropy, &data, &data, &config, &mut rng).unwrap();
        assert!(history.stopped_early);
        assert_eq!(history.epochs.len(), 3);
        assert_eq!(history.best_val_loss, history.epochs[0].val_loss);
    }

    #[test]
    fn test_runs_all_epochs_without_patience() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Perceptron::new(2, &mut rng);
        let data = separable(40);
        let mut optimizer = Optimizer::sgd(0.5, 0.9);
        let config = TrainConfig {
            epochs: 30,
            batch_size: 8,
            ..TrainConfig::default()
        };
        let history =
            fit(&mut model, &mut optimizer, Loss::BinaryCrossEntropy, &data, &data, &config, &mut rng).unwrap();
        assert_eq!(history.epochs.len(), 30);
        assert!(!history.stopped_early);
        let first = history.epochs[0].val_loss;
        assert!(history.last().unwrap().val_loss < first);
        assert!(history.last().unwrap().val_accuracy > 0.9);
    }

    #[test]
    fn test_shape_mismatch_fails_fast() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Perceptron::new(3, &mut rng);
        let data = separable(8);
        let mut optimizer = Optimizer::new(0.1);
        let result = fit(
            &mut model,
            &mut optimizer,
            Loss::BinaryCrossEntropy,
            &data,
            &data,
            &TrainConfig::default(),
            &mut rng,
        );
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
        assert_eq!(optimizer.steps_taken(), 0);
    }

    #[test]
    fn test_skipping_every_batch_is_an_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Perceptron::new(2, &mut rng);
        let data = separable(10);
        let mut optimizer = Optimizer::new(0.1);
        let config = TrainConfig {
            epochs: 5,
            batch_size: 16,
            min_batch: 12,
            ..TrainConfig::default()
        };
        let result = fit(&mut model, &mut optimizer, Loss::BinaryCrossEntropy, &data, &data, &config, &mut rng);
        assert!(matches!(result, Err(Error::InsufficientData(_))));
        assert_eq!(optimizer.steps_taken(), 0);
    }

    #[test]
    fn test_small_training_set_still_trains_as_one_batch() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Perceptron::new(2, &mut rng);
        let data = separable(9);
        let mut optimizer = Optimizer::new(0.1);
        let config = TrainConfig {
            epochs: 3,
            batch_size: 16,
            min_batch: 2,
            ..TrainConfig::default()
        };
        let history =
            fit(&mut model, &mut optimizer, Loss::BinaryCrossEntropy, &data, &data, &config, &mut rng).unwrap();
        assert_eq!(optimizer.steps_taken(), 3);
        assert!(history.epochs.iter().all(|e| e.train_loss > 0.0));
    }

    #[test]
    fn test_predict_returns_probabilities() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = Perceptron::new(2, &mut rng);
        let data = separable(6);
        let predictions = predict(&mut model, Loss::BinaryCrossEntropy, &data, 4).unwrap();
        assert_eq!(predictions.scores.len(), 6);
        assert_eq!(predictions.labels, data.labels.to_vec());
        for (&score, &class) in predictions.scores.iter().zip(&predictions.classes) {
            assert!((0.0..=1.0).contains(&score));
            assert_eq!(class, usize::from(score > 0.5));
        }
    }
}
