use ndarray::{Array2, Array3, Axis};
use serde::Serialize;
use tracing::{info, warn};

use super::{column_refs, log_report};
use crate::config::{make_rng, StockConfig};
use crate::data::stock::{forward_labels, make_sequences, moving_average};
use crate::data::{Dataset, MinMaxScaler, RawTable, Table};
use crate::error::{Error, Result};
use crate::loss::Loss;
use crate::metrics::{apply_threshold, auc, roc_curve, youden_threshold, ClassificationReport};
use crate::models::{GruClassifier, Network};
use crate::optimizer::Optimizer;
use crate::training::{fit, predict, TrainingHistory};

#[derive(Debug, Clone, Serialize)]
pub struct StockReport {
    pub rows: usize,
    pub sequences: usize,
    pub positive_rate: f64,
    pub train_size: usize,
    pub val_size: usize,
    pub test_size: usize,
    pub parameters: usize,
    pub history: TrainingHistory,
    pub test: ClassificationReport,
}

/// Price-based features plus one trailing moving average of the price per
/// configured window. Rows where any average is still undefined are dropped.
///
/// Returns the feature rows and the matching prices.
pub fn engineer_features(table: &Table, config: &StockConfig) -> Result<(Array2<f64>, Vec<f64>)> {
    let mut table = table.clone();
    let prices = table.column(&config.price_column)?.to_owned();
    for &window in &config.moving_averages {
        table.push_column(&format!("MA_{}", window), moving_average(prices.view(), window))?;
    }
    let dropped = table.drop_incomplete_rows();
    info!(dropped, remaining = table.nrows(), "dropped rows with incomplete features");

    let prices = table.column(&config.price_column)?.to_vec();
    Ok((table.values, prices))
}

/// Labels each row by its forward price move, scales the labelled rows to
/// `[0, 1]` and cuts them into windows.
pub fn build_sequences(
    features: &Array2<f64>,
    prices: &[f64],
    config: &StockConfig,
) -> Result<(Array3<f64>, Vec<usize>)> {
    let labels = forward_labels(prices, config.horizon, config.threshold);
    if labels.is_empty() {
        return Err(Error::InsufficientData(format!(
            "{} rows leave nothing to label with a horizon of {}",
            prices.len(),
            config.horizon
        )));
    }
    let labelled = features.slice_axis(Axis(0), (0..labels.len()).into()).to_owned();
    let (_, scaled) = MinMaxScaler::fit_transform(&labelled)?;
    make_sequences(&scaled, &labels, config.window)
}

pub fn run(config: &StockConfig) -> Result<StockReport> {
    config.validate()?;
    let mut rng = make_rng(config.seed);

    let mut raw = RawTable::read_csv(&config.data_path)?;
    if config.newest_first {
        raw.reverse_rows();
    }
    raw.strip_currency(&column_refs(&config.currency_columns))?;
    let table = raw.into_numeric(&column_refs(&config.feature_columns))?;
    let rows = table.nrows();

    let (features, prices) = engineer_features(&table, config)?;
    let (sequences, labels) = build_sequences(&features, &prices, config)?;
    let positive_rate = labels.iter().sum::<usize>() as f64 / labels.len() as f64;
    info!(sequences = labels.len(), positive_rate, "built sequences");

    let data = Dataset::new(sequences.mapv(|v| v as f32).into_dyn(), labels.into())?;
    let (train, rest) = data.split(config.train_fraction, false, &mut rng)?;
    let val_share = config.val_fraction / (1.0 - config.train_fraction);
    let (val, test) = rest.split(val_share, false, &mut rng)?;
    if train.is_empty() || val.is_empty() || test.is_empty() {
        return Err(Error::InsufficientData(format!(
            "{} sequences are too few for a train/validation/test split",
            data.len()
        )));
    }

    let mut model = GruClassifier::new(
        features.ncols(),
        config.hidden_size,
        config.num_layers,
        1,
        config.dropout,
        &mut rng,
    );
    let mut optimizer = Optimizer::adam(config.learning_rate).with_weight_decay(config.weight_decay);
    let loss = Loss::BinaryCrossEntropy;
    info!(
        parameters = model.parameter_count(),
        train = train.len(),
        val = val.len(),
        test = test.len(),
        "training GRU"
    );

    let history = fit(&mut model, &mut optimizer, loss, &train, &val, &config.training, &mut rng)?;

    let predictions = predict(&mut model, loss, &test, config.training.batch_size)?;
    let (threshold, roc_auc) = match roc_curve(&predictions.labels, &predictions.scores) {
        Ok(roc) => (youden_threshold(&roc), Some(auc(&roc.fpr, &roc.tpr))),
        Err(Error::InsufficientData(reason)) => {
            warn!(%reason, "ROC undefined on the test set, falling back to 0.5");
            (0.5, None)
        }
        Err(e) => return Err(e),
    };
    info!(threshold, auc = ?roc_auc, "selected decision threshold");

    let predicted = apply_threshold(&predictions.scores, threshold);
    let mut report = ClassificationReport::binary(&predictions.labels, &predicted)?.with_threshold(threshold);
    if let Some(value) = roc_auc {
        report = report.with_auc(value);
    }
    log_report("stock", &report);

    Ok(StockReport {
        rows,
        sequences: data.len(),
        positive_rate,
        train_size: train.len(),
        val_size: val.len(),
        test_size: test.len(),
        parameters: model.parameter_count(),
        history,
        test: report,
    })
}
