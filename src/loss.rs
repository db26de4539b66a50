use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::activation::sigmoid;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Binary cross entropy on a single logit per sample; labels are 0 or 1.
    BinaryCrossEntropy,
    /// Softmax cross entropy over one logit per class; labels are class indices.
    CrossEntropy,
}

impl Loss {
    /// Mean loss over the batch.
    pub fn calculate(&self, logits: &Array2<f32>, targets: &Array1<usize>) -> Result<f32> {
        self.check(logits, targets)?;
        let n = logits.nrows().max(1) as f32;
        let total: f32 = match self {
            Loss::BinaryCrossEntropy => logits
                .column(0)
                .iter()
                .zip(targets.iter())
                .map(|(&x, &y)| {
                    // max(x, 0) - x·y + ln(1 + e^-|x|)
                    x.max(0.0) - x * y as f32 + (-x.abs()).exp().ln_1p()
                })
                .sum(),
            Loss::CrossEntropy => logits
                .outer_iter()
                .zip(targets.iter())
                .map(|(row, &y)| {
                    let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    let log_sum = row.mapv(|v| (v - max).exp()).sum().ln() + max;
                    log_sum - row[y]
                })
                .sum(),
        };
        Ok(total / n)
    }

    /// Gradient of the mean loss with respect to the logits.
    pub fn gradient(&self, logits: &Array2<f32>, targets: &Array1<usize>) -> Result<Array2<f32>> {
        self.check(logits, targets)?;
        let n = logits.nrows().max(1) as f32;
        let mut grad = self.probabilities(logits);
        for (mut row, &y) in grad.outer_iter_mut().zip(targets.iter()) {
            match self {
                Loss::BinaryCrossEntropy => row[0] -= y as f32,
                Loss::CrossEntropy => row[y] -= 1.0,
            }
        }
        grad /= n;
        Ok(grad)
    }

    /// Sigmoid of the logit for binary losses, softmax over classes otherwise.
    pub fn probabilities(&self, logits: &Array2<f32>) -> Array2<f32> {
        match self {
            Loss::BinaryCrossEntropy => logits.mapv(sigmoid),
            Loss::CrossEntropy => {
                let mut probs = logits.clone();
                for mut row in probs.outer_iter_mut() {
                    let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    row.mapv_inplace(|v| (v - max).exp());
                    let sum = row.sum();
                    row /= sum;
                }
                probs
            }
        }
    }

    /// Hard class decisions: logit above zero for binary losses, arg-max otherwise.
    pub fn predict_classes(&self, logits: &Array2<f32>) -> Vec<usize> {
        match self {
            Loss::BinaryCrossEntropy => logits.column(0).iter().map(|&x| usize::from(x > 0.0)).collect(),
            Loss::CrossEntropy => logits
                .axis_iter(Axis(0))
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                        .0
                })
                .collect(),
        }
    }

    fn check(&self, logits: &Array2<f32>, targets: &Array1<usize>) -> Result<()> {
        if logits.nrows() != targets.len() {
            return Err(Error::shape_mismatch("Loss", targets.len(), logits.nrows()));
        }
        match self {
            Loss::BinaryCrossEntropy if logits.ncols() != 1 => {
                Err(Error::shape_mismatch("Loss::BinaryCrossEntropy", ("batch", 1), logits.dim()))
            }
            Loss::BinaryCrossEntropy if targets.iter().any(|&y| y > 1) => {
                Err(Error::InvalidConfig("binary cross entropy labels must be 0 or 1".into()))
            }
            Loss::CrossEntropy if targets.iter().any(|&y| y >= logits.ncols()) => Err(Error::shape_mismatch(
                "Loss::CrossEntropy",
                ("classes", logits.ncols()),
                targets.iter().max(),
            )),
            _ => Ok(()),
        }
    }
}
