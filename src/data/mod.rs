pub mod cifar;
pub mod impute;
pub mod scaling;
pub mod stock;
pub mod table;

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};
use crate::layers::Tensor;

pub use impute::KnnImputer;
pub use scaling::{MinMaxScaler, StandardScaler};
pub use table::{RawTable, Table};

/// Samples along axis 0 of `features`, one label per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub features: Tensor,
    pub labels: Array1<usize>,
}

impl Dataset {
    pub fn new(features: Tensor, labels: Array1<usize>) -> Result<Self> {
        if features.ndim() == 0 || features.shape()[0] != labels.len() {
            return Err(Error::shape_mismatch("Dataset", ("samples", labels.len()), features.shape()));
        }
        Ok(Dataset { features, labels })
    }

    /// Converts a `(samples, features)` table into an `f32` dataset.
    pub fn from_table(features: &Array2<f64>, labels: &[usize]) -> Result<Self> {
        Self::new(features.mapv(|v| v as f32).into_dyn(), Array1::from(labels.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Shape of one sample, without the batch axis.
    pub fn sample_shape(&self) -> &[usize] {
        &self.features.shape()[1..]
    }

    pub fn select(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }

    /// Consecutive batches of at most `batch_size` samples, visiting samples in `order`.
    pub fn batches<'a>(&'a self, batch_size: usize, order: &'a [usize]) -> impl Iterator<Item = Dataset> + 'a {
        order.chunks(batch_size.max(1)).map(move |indices| self.select(indices))
    }

    /// Sample indices, shuffled when `shuffle` is set.
    pub fn order<R: Rng + ?Sized>(&self, shuffle: bool, rng: &mut R) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            order.shuffle(rng);
        }
        order
    }

    /// Splits off the first `fraction` of the samples (of a random
    /// permutation when `shuffle` is set); the rest form the second part.
    pub fn split<R: Rng + ?Sized>(&self, fraction: f64, shuffle: bool, rng: &mut R) -> Result<(Dataset, Dataset)> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(Error::InvalidConfig(format!("split fraction must be in [0, 1], got {}", fraction)));
        }
        let order = self.order(shuffle, rng);
        let cut = (self.len() as f64 * fraction).round() as usize;
        Ok((self.select(&order[..cut]), self.select(&order[cut..])))
    }

    pub fn class_counts(&self, classes: usize) -> Vec<usize> {
        let mut counts = vec![0; classes];
        for &label in self.labels.iter() {
            if label < classes {
                counts[label] += 1;
            }
        }
        counts
    }
}

/// Row-wise train/test split of a feature table and its labels.
///
/// The test part holds `ceil(test_fraction · rows)` rows.
pub fn train_test_split<R: Rng + ?Sized>(
    features: &Array2<f64>,
    labels: &[usize],
    test_fraction: f64,
    shuffle: bool,
    rng: &mut R,
) -> Result<(Array2<f64>, Array2<f64>, Vec<usize>, Vec<usize>)> {
    let rows = features.nrows();
    if rows != labels.len() {
        return Err(Error::shape_mismatch("train_test_split", ("rows", labels.len()), features.dim()));
    }
    if !(0.0 < test_fraction && test_fraction < 1.0) {
        return Err(Error::InvalidConfig(format!("test fraction must be in (0, 1), got {}", test_fraction)));
    }
    let test = (rows as f64 * test_fraction).ceil() as usize;
    if test == 0 || test >= rows {
        return Err(Error::InsufficientData(format!(
            "cannot split {} rows with test fraction {}",
            rows, test_fraction
        )));
    }

    let mut order: Vec<usize> = (0..rows).collect();
    if shuffle {
        order.shuffle(rng);
    }
    let (test_idx, train_idx) = order.split_at(test);
    let pick = |idx: &[usize]| idx.iter().map(|&i| labels[i]).collect::<Vec<_>>();
    Ok((
        features.select(Axis(0), train_idx),
        features.select(Axis(0), test_idx),
        pick(train_idx),
        pick(test_idx),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn numbered(n: usize) -> Dataset {
        let features = Array2::from_shape_fn((n, 2), |(i, j)| (i * 10 + j) as f32).into_dyn();
        Dataset::new(features, Array1::from_iter(0..n)).unwrap()
    }

    #[test]
    fn test_class_counts_ignore_out_of_range_labels() {
        let data = Dataset::new(Tensor::zeros(vec![5, 1]), array![0, 2, 2, 1, 7]).unwrap();
        assert_eq!(data.class_counts(3), vec![1, 1, 2]);
    }

    #[test]
    fn test_rejects_length_mismatch() {
        assert!(Dataset::new(Tensor::zeros(vec![3, 2]), array![0, 1]).is_err());
    }

    #[test]
    fn test_batches_cover_every_sample_once() {
        let data = numbered(10);
        let mut rng = StdRng::seed_from_u64(0);
        let order = data.order(true, &mut rng);
        let mut seen: Vec<usize> = data.batches(4, &order).flat_map(|b| b.labels.to_vec()).collect();
        assert_eq!(data.batches(4, &order).count(), 3);
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_chronological_split_keeps_order() {
        let data = numbered(10);
        let mut rng = StdRng::seed_from_u64(0);
        let (head, tail) = data.split(0.7, false, &mut rng).unwrap();
        assert_eq!(head.labels.to_vec(), (0..7).collect::<Vec<_>>());
        assert_eq!(tail.labels.to_vec(), vec![7, 8, 9]);
        assert_eq!(tail.features[[0, 1]], 71.0);
    }

    #[test]
    fn test_train_test_split_is_a_partition() {
        let features = Array2::from_shape_fn((9, 1), |(i, _)| i as f64);
        let labels: Vec<usize> = (0..9).collect();
        let mut rng = StdRng::seed_from_u64(8);
        let (x_train, x_test, y_train, y_test) = train_test_split(&features, &labels, 0.2, true, &mut rng).unwrap();
        assert_eq!(x_test.nrows(), 2);
        assert_eq!(x_train.nrows(), 7);
        for (row, &y) in x_train.outer_iter().zip(&y_train) {
            assert_eq!(row[0], y as f64);
        }
        let mut all: Vec<usize> = y_train.iter().chain(&y_test).copied().collect();
        all.sort();
        assert_eq!(all, labels);
    }
}
