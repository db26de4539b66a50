//! Feature and label construction for daily price series.

use ndarray::{s, Array1, Array2, Array3, ArrayView1};

use crate::error::{Error, Result};

/// Trailing mean over `window` rows; the first `window - 1` entries are `NaN`.
pub fn moving_average(values: ArrayView1<f64>, window: usize) -> Array1<f64> {
    let mut out = Array1::from_elem(values.len(), f64::NAN);
    if window == 0 || window > values.len() {
        return out;
    }
    // a missing value only poisons the windows that contain it
    for (i, rows) in values.windows(window).into_iter().enumerate() {
        out[i + window - 1] = rows.sum() / window as f64;
    }
    out
}

/// Label `i` is 1 when the price rises by more than `threshold` (as a
/// fraction) over the next `horizon` rows, otherwise 0.
///
/// The last `horizon` rows have no future price and get no label, so the
/// result has `prices.len() - horizon` entries.
pub fn forward_labels(prices: &[f64], horizon: usize, threshold: f64) -> Vec<usize> {
    if horizon >= prices.len() {
        return Vec::new();
    }
    prices
        .iter()
        .zip(&prices[horizon..])
        .map(|(&now, &later)| usize::from((later - now) / now > threshold))
        .collect()
}

/// Sliding windows of `window` consecutive rows.
///
/// Sequence `j` is `data[j..j + window]` and is labelled with
/// `targets[j + window]`, the row right after the window.
pub fn make_sequences(data: &Array2<f64>, targets: &[usize], window: usize) -> Result<(Array3<f64>, Vec<usize>)> {
    if data.nrows() != targets.len() {
        return Err(Error::shape_mismatch("make_sequences", ("rows", targets.len()), data.dim()));
    }
    if window == 0 || data.nrows() <= window {
        return Err(Error::InsufficientData(format!(
            "{} rows are not enough for windows of {}",
            data.nrows(),
            window
        )));
    }

    let count = data.nrows() - window;
    let mut sequences = Array3::<f64>::zeros((count, window, data.ncols()));
    for j in 0..count {
        sequences.slice_mut(s![j, .., ..]).assign(&data.slice(s![j..j + window, ..]));
    }
    Ok((sequences, targets[window..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_moving_average() {
        let values = array![1.0, 2.0, 3.0, 4.0];
        let ma = moving_average(values.view(), 2);
        assert!(ma[0].is_nan());
        assert_eq!(ma.slice(s![1..]).to_vec(), vec![1.5, 2.5, 3.5]);
        assert!(moving_average(values.view(), 5).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_moving_average_recovers_after_gap() {
        let mut values = Array1::from_iter((0..20).map(f64::from));
        values[3] = f64::NAN;
        let ma = moving_average(values.view(), 3);
        assert_eq!(ma[2], 1.0);
        for i in 3..=5 {
            assert!(ma[i].is_nan(), "index {}", i);
        }
        assert_eq!(ma[6], 5.0);
        assert_eq!(ma[10], 9.0);
        assert_eq!(ma[19], 18.0);
    }

    #[test]
    fn test_forward_labels_definition() {
        let prices = [100.0, 104.0, 106.0, 100.0, 110.0];
        let labels = forward_labels(&prices, 2, 0.05);
        // 106/100, 100/104, 110/106
        assert_eq!(labels, vec![1, 0, 0]);
    }

    #[test]
    fn test_exact_threshold_is_not_a_rise() {
        assert_eq!(forward_labels(&[100.0, 105.0], 1, 0.05), vec![0]);
    }

    #[test]
    fn test_sequences_shape_and_labels() {
        let data = Array2::from_shape_fn((6, 2), |(i, j)| (i * 2 + j) as f64);
        let targets = vec![0, 1, 0, 1, 1, 0];
        let (seqs, labels) = make_sequences(&data, &targets, 4).unwrap();
        assert_eq!(seqs.dim(), (2, 4, 2));
        assert_eq!(seqs.slice(s![1, .., ..]), data.slice(s![1..5, ..]));
        assert_eq!(labels, vec![1, 0]);
    }

    #[test]
    fn test_sequences_need_more_rows_than_window() {
        let data = Array2::<f64>::zeros((3, 1));
        assert!(make_sequences(&data, &[0, 0, 0], 3).is_err());
    }
}
