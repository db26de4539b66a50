use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fills missing (`NaN`) cells with the mean of the `k` nearest rows that
/// have the cell present.
///
/// Distances are nan-euclidean: squared differences over the coordinates
/// present in both rows, scaled up by `total / present` coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnnImputer {
    pub k: usize,
}

impl Default for KnnImputer {
    fn default() -> Self {
        KnnImputer { k: 5 }
    }
}

impl KnnImputer {
    pub fn new(k: usize) -> Self {
        KnnImputer { k }
    }

    pub fn fit_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if self.k == 0 {
            return Err(Error::InvalidConfig("KNN imputation needs k >= 1".into()));
        }
        let column_means: Vec<f64> = data
            .columns()
            .into_iter()
            .map(|col| {
                let present: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
                if present.is_empty() {
                    f64::NAN
                } else {
                    present.iter().sum::<f64>() / present.len() as f64
                }
            })
            .collect();
        if let Some(c) = column_means.iter().position(|m| m.is_nan()) {
            return Err(Error::InsufficientData(format!("column {} has no observed values to impute from", c)));
        }

        let mut output = data.clone();
        for (r, row) in data.outer_iter().enumerate() {
            let missing: Vec<usize> = (0..row.len()).filter(|&c| row[c].is_nan()).collect();
            if missing.is_empty() {
                continue;
            }

            let distances: Vec<Option<f64>> = data
                .outer_iter()
                .enumerate()
                .map(|(d, donor)| if d == r { None } else { nan_euclidean(row, donor) })
                .collect();

            for c in missing {
                let mut donors: Vec<(f64, f64)> = data
                    .outer_iter()
                    .zip(&distances)
                    .filter_map(|(donor, dist)| match dist {
                        Some(dist) if !donor[c].is_nan() => Some((*dist, donor[c])),
                        _ => None,
                    })
                    .collect();
                // stable: equal distances keep row order
                donors.sort_by(|a, b| a.0.total_cmp(&b.0));
                donors.truncate(self.k);

                output[[r, c]] = if donors.is_empty() {
                    column_means[c]
                } else {
                    donors.iter().map(|(_, v)| v).sum::<f64>() / donors.len() as f64
                };
            }
        }
        Ok(output)
    }
}

/// `None` when the rows share no observed coordinate.
fn nan_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Option<f64> {
    let mut present = 0usize;
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        if !x.is_nan() && !y.is_nan() {
            present += 1;
            sum += (x - y).powi(2);
        }
    }
    (present > 0).then(|| (sum * a.len() as f64 / present as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nan_euclidean_scales_by_present_coordinates() {
        let a = array![1.0, f64::NAN, 3.0];
        let b = array![1.0, 2.0, 5.0];
        // sqrt(3/2 · 4)
        let d = nan_euclidean(a.view(), b.view()).unwrap();
        assert!((d - 6.0f64.sqrt()).abs() < 1e-12);
        assert!(nan_euclidean(array![f64::NAN].view(), array![1.0].view()).is_none());
    }

    #[test]
    fn test_fills_from_nearest_rows() {
        let data = array![
            [1.0, 10.0],
            [1.1, 12.0],
            [5.0, 50.0],
            [1.05, f64::NAN],
        ];
        let filled = KnnImputer::new(2).fit_transform(&data).unwrap();
        assert!((filled[[3, 1]] - 11.0).abs() < 1e-12);
        assert_eq!(filled.row(0), data.row(0));
    }

    #[test]
    fn test_falls_back_to_column_mean() {
        let data = array![[f64::NAN, 1.0], [2.0, f64::NAN], [4.0, f64::NAN]];
        let filled = KnnImputer::new(5).fit_transform(&data).unwrap();
        // row 0 shares no coordinate with the donors of column 0
        assert_eq!(filled[[0, 0]], 3.0);
        assert_eq!(filled[[1, 1]], 1.0);
        assert!(filled.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_all_missing_column_is_an_error() {
        let data = array![[1.0, f64::NAN], [2.0, f64::NAN]];
        assert!(KnnImputer::default().fit_transform(&data).is_err());
    }
}
