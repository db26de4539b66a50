use std::collections::BTreeMap;

use ndarray::Array2;
use serde::Serialize;

use crate::error::{Error, Result};

/// Receiver operating characteristic: one point per retained threshold,
/// starting at `(0, 0)` with an infinite threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
}

/// Builds the ROC curve for binary `labels` and positive-class `scores`.
///
/// A sample counts as predicted positive at threshold `t` when its score is
/// at least `t`. Points collinear with their neighbours are dropped.
pub fn roc_curve(labels: &[usize], scores: &[f64]) -> Result<RocCurve> {
    if labels.len() != scores.len() {
        return Err(Error::shape_mismatch("roc_curve", labels.len(), scores.len()));
    }
    if labels.iter().any(|&y| y > 1) {
        return Err(Error::InvalidConfig("ROC labels must be 0 or 1".into()));
    }
    let positives = labels.iter().filter(|&&y| y == 1).count();
    if positives == 0 || positives == labels.len() {
        return Err(Error::InsufficientData(
            "ROC curve needs both positive and negative samples".into(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    // cumulative counts at the last index of each distinct score
    let mut tps = Vec::new();
    let mut fps = Vec::new();
    let mut thresholds = Vec::new();
    let mut tp = 0usize;
    for (rank, &i) in order.iter().enumerate() {
        tp += labels[i];
        let last_of_run = order.get(rank + 1).map_or(true, |&next| scores[next] != scores[i]);
        if last_of_run {
            tps.push(tp as f64);
            fps.push((rank + 1 - tp) as f64);
            thresholds.push(scores[i]);
        }
    }

    let keep: Vec<usize> = if tps.len() > 2 {
        (0..tps.len())
            .filter(|&i| {
                i == 0
                    || i == tps.len() - 1
                    || fps[i - 1] - 2.0 * fps[i] + fps[i + 1] != 0.0
                    || tps[i - 1] - 2.0 * tps[i] + tps[i + 1] != 0.0
            })
            .collect()
    } else {
        (0..tps.len()).collect()
    };

    let total_pos = positives as f64;
    let total_neg = (labels.len() - positives) as f64;
    let mut curve = RocCurve {
        fpr: vec![0.0],
        tpr: vec![0.0],
        thresholds: vec![f64::INFINITY],
    };
    for i in keep {
        curve.fpr.push(fps[i] / total_neg);
        curve.tpr.push(tps[i] / total_pos);
        curve.thresholds.push(thresholds[i]);
    }
    Ok(curve)
}

/// The ROC threshold maximising Youden's J (`tpr − fpr`); the first
/// maximum in curve order wins.
pub fn youden_threshold(roc: &RocCurve) -> f64 {
    let mut best = (f64::NEG_INFINITY, f64::INFINITY);
    for ((&fpr, &tpr), &threshold) in roc.fpr.iter().zip(&roc.tpr).zip(&roc.thresholds) {
        let j = tpr - fpr;
        if j > best.0 {
            best = (j, threshold);
        }
    }
    best.1
}

/// Trapezoidal area under a curve whose `x` values are sorted ascending.
pub fn auc(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

pub fn roc_auc_score(labels: &[usize], scores: &[f64]) -> Result<f64> {
    let roc = roc_curve(labels, scores)?;
    Ok(auc(&roc.fpr, &roc.tpr))
}

/// `1` where `score >= threshold`, `0` otherwise.
pub fn apply_threshold(scores: &[f64], threshold: f64) -> Vec<usize> {
    scores.iter().map(|&s| usize::from(s >= threshold)).collect()
}

/// Rows are true classes, columns predicted classes.
pub fn confusion_matrix(labels: &[usize], predictions: &[usize], classes: usize) -> Result<Array2<usize>> {
    if labels.len() != predictions.len() {
        return Err(Error::shape_mismatch("confusion_matrix", labels.len(), predictions.len()));
    }
    let mut matrix = Array2::<usize>::zeros((classes, classes));
    for (&y, &p) in labels.iter().zip(predictions) {
        if y >= classes || p >= classes {
            return Err(Error::InvalidConfig(format!(
                "class index {} outside 0..{}",
                y.max(p),
                classes
            )));
        }
        matrix[[y, p]] += 1;
    }
    Ok(matrix)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Final metrics of an experiment run.
///
/// Precision, recall and F1 are those of the positive class for binary
/// problems and unweighted class means otherwise; an undefined ratio is 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl ClassificationReport {
    pub fn binary(labels: &[usize], predictions: &[usize]) -> Result<Self> {
        let matrix = confusion_matrix(labels, predictions, 2)?;
        let (tn, fp, fn_, tp) = (matrix[[0, 0]], matrix[[0, 1]], matrix[[1, 0]], matrix[[1, 1]]);
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        Ok(ClassificationReport {
            samples: labels.len(),
            accuracy: ratio(tp + tn, labels.len()),
            precision,
            recall,
            f1: f1(precision, recall),
            auc: None,
            threshold: None,
            confusion_matrix: rows(&matrix),
        })
    }

    pub fn multiclass(labels: &[usize], predictions: &[usize], classes: usize) -> Result<Self> {
        let matrix = confusion_matrix(labels, predictions, classes)?;
        let correct: usize = (0..classes).map(|c| matrix[[c, c]]).sum();
        let mut precision = 0.0;
        let mut recall = 0.0;
        let mut f1_sum = 0.0;
        for c in 0..classes {
            let predicted = matrix.column(c).sum();
            let actual = matrix.row(c).sum();
            let p = ratio(matrix[[c, c]], predicted);
            let r = ratio(matrix[[c, c]], actual);
            precision += p;
            recall += r;
            f1_sum += f1(p, r);
        }
        let k = classes.max(1) as f64;
        Ok(ClassificationReport {
            samples: labels.len(),
            accuracy: ratio(correct, labels.len()),
            precision: precision / k,
            recall: recall / k,
            f1: f1_sum / k,
            auc: None,
            threshold: None,
            confusion_matrix: rows(&matrix),
        })
    }

    pub fn with_auc(mut self, auc: f64) -> Self {
        self.auc = Some(auc);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        map.insert("accuracy".to_string(), self.accuracy);
        map.insert("precision".to_string(), self.precision);
        map.insert("recall".to_string(), self.recall);
        map.insert("f1".to_string(), self.f1);
        if let Some(auc) = self.auc {
            map.insert("auc".to_string(), auc);
        }
        map
    }
}

fn rows(matrix: &Array2<usize>) -> Vec<Vec<usize>> {
    matrix.outer_iter().map(|r| r.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roc_curve_reference_values() {
        let labels = [0, 0, 1, 1];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let roc = roc_curve(&labels, &scores).unwrap();
        assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
        assert_eq!(roc.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
        assert_eq!(roc.thresholds[1..], [0.8, 0.4, 0.35, 0.1]);
        assert!(roc.thresholds[0].is_infinite());
        assert!((auc(&roc.fpr, &roc.tpr) - 0.75).abs() < 1e-12);
        assert_eq!(youden_threshold(&roc), 0.8);
    }

    #[test]
    fn test_roc_drops_collinear_points_and_merges_ties() {
        let labels = [1, 1, 1, 0, 0];
        let scores = [0.9, 0.8, 0.7, 0.3, 0.3];
        let roc = roc_curve(&labels, &scores).unwrap();
        // 0.8 lies on the vertical segment between 0.9 and 0.7
        assert_eq!(roc.thresholds[1..], [0.9, 0.7, 0.3]);
        assert_eq!(roc.tpr, vec![0.0, 1.0 / 3.0, 1.0, 1.0]);
        assert_eq!(roc.fpr, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(youden_threshold(&roc), 0.7);
        assert_eq!(roc_auc_score(&labels, &scores).unwrap(), 1.0);
    }

    #[test]
    fn test_roc_needs_both_classes() {
        assert!(roc_curve(&[1, 1], &[0.2, 0.4]).is_err());
    }

    #[test]
    fn test_binary_report() {
        let labels = [1, 0, 1, 1, 0, 0];
        let preds = [1, 0, 0, 1, 1, 0];
        let report = ClassificationReport::binary(&labels, &preds).unwrap();
        assert_eq!(report.confusion_matrix, vec![vec![2, 1], vec![1, 2]]);
        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert!((report.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.recall - 2.0 / 3.0).abs() < 1e-12);
        assert!((report.f1 - 2.0 / 3.0).abs() < 1e-12);
        assert!(!report.to_map().contains_key("auc"));
    }

    #[test]
    fn test_macro_report_counts_missing_classes_as_zero() {
        let labels = [0, 1, 2, 2];
        let preds = [0, 2, 2, 2];
        let report = ClassificationReport::multiclass(&labels, &preds, 3).unwrap();
        assert_eq!(report.accuracy, 0.75);
        // precision: 1, 0, 2/3
        assert!((report.precision - (1.0 + 2.0 / 3.0) / 3.0).abs() < 1e-12);
        assert!((report.recall - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_apply_threshold_is_inclusive() {
        assert_eq!(apply_threshold(&[0.5, 0.49, 0.9], 0.5), vec![1, 0, 1]);
    }
}
