use ndarray::Array2;
use serde::Serialize;
use tracing::{info, warn};

use super::{column_refs, log_report};
use crate::config::{make_rng, DiabetesConfig};
use crate::data::{train_test_split, Dataset, KnnImputer, RawTable, StandardScaler, Table};
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::metrics::{apply_threshold, roc_auc_score, ClassificationReport};
use crate::models::{Network, Perceptron};
use crate::optimizer::Optimizer;
use crate::training::{fit, predict, TrainingHistory};

#[derive(Debug, Clone, Serialize)]
pub struct DiabetesReport {
    pub rows: usize,
    pub missing_replaced: usize,
    pub features: Vec<String>,
    pub train_size: usize,
    pub test_size: usize,
    pub history: TrainingHistory,
    pub test: ClassificationReport,
}

/// Imputed and standardised feature matrix with its labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub features: Array2<f64>,
    pub labels: Vec<usize>,
    pub feature_names: Vec<String>,
    pub missing_replaced: usize,
}

/// Marks zero readings as missing, fills them from the nearest patients and
/// standardises every feature column.
pub fn preprocess(mut table: Table, config: &DiabetesConfig) -> Result<Prepared> {
    let missing_replaced = table.replace_zeros_with_missing(&column_refs(&config.zero_missing_columns))?;
    info!(missing_replaced, "replaced zero readings with missing values");

    let labels = table
        .column(&config.target_column)?
        .iter()
        .enumerate()
        .map(|(row, &v)| match v {
            v if v == 0.0 => Ok(0),
            v if v == 1.0 => Ok(1),
            v => Err(Error::Parse {
                row: row + 1,
                column: config.target_column.clone(),
                value: v.to_string(),
            }),
        })
        .collect::<Result<Vec<usize>>>()?;
    info!(missing = table.missing_count(), k = config.knn_neighbors, "imputing missing cells");

    let feature_names: Vec<String> = table
        .columns
        .iter()
        .filter(|c| **c != config.target_column)
        .cloned()
        .collect();
    let features = table.select(&column_refs(&feature_names))?;

    let imputed = KnnImputer::new(config.knn_neighbors).fit_transform(&features)?;
    let (_, scaled) = StandardScaler::fit_transform(&imputed)?;

    Ok(Prepared {
        features: scaled,
        labels,
        feature_names,
        missing_replaced,
    })
}

pub fn run(config: &DiabetesConfig) -> Result<DiabetesReport> {
    config.validate()?;
    let mut rng = make_rng(config.seed);

    let raw = RawTable::read_csv(&config.data_path)?;
    let headers = raw.headers.clone();
    let table = raw.into_numeric(&column_refs(&headers))?;
    let rows = table.nrows();
    let prepared = preprocess(table, config)?;

    let (x_train, x_test, y_train, y_test) =
        train_test_split(&prepared.features, &prepared.labels, config.test_fraction, true, &mut rng)?;
    let train = Dataset::from_table(&x_train, &y_train)?;
    let test = Dataset::from_table(&x_test, &y_test)?;

    let mut model = Perceptron::new(prepared.feature_names.len(), &mut rng);
    let mut optimizer = Optimizer::sgd(config.learning_rate, config.momentum);
    let loss = Loss::BinaryCrossEntropy;
    info!(parameters = model.parameter_count(), train = train.len(), test = test.len(), "training perceptron");

    let history = fit(&mut model, &mut optimizer, loss, &train, &test, &config.training, &mut rng)?;

    let predictions = predict(&mut model, loss, &test, config.training.batch_size)?;
    let predicted = apply_threshold(&predictions.scores, config.threshold);
    let mut report =
        ClassificationReport::binary(&predictions.labels, &predicted)?.with_threshold(config.threshold);
    match roc_auc_score(&predictions.labels, &predictions.scores) {
        Ok(value) => report = report.with_auc(value),
        Err(Error::InsufficientData(reason)) => warn!(%reason, "AUC undefined on the test set"),
        Err(e) => return Err(e),
    }
    log_report("diabetes", &report);

    Ok(DiabetesReport {
        rows,
        missing_replaced: prepared.missing_replaced,
        features: prepared.feature_names,
        train_size: train.len(),
        test_size: test.len(),
        history,
        test: report,
    })
}
