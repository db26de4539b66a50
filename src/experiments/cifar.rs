use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use super::log_report;
use crate::config::{make_rng, CifarConfig, SearchKind};
use crate::data::cifar::{load_batches, CLASS_NAMES};
use crate::data::Dataset;
use crate::error::Result;
use crate::hyperparameters::Hyperparameters;
use crate::loss::Loss;
use crate::metrics::ClassificationReport;
use crate::models::convnet::Architecture;
use crate::models::{ConvNet, Network};
use crate::optimizer::Optimizer;
use crate::search::{grid_search, random_search, SearchOutcome};
use crate::training::{evaluate, fit, predict, TrainConfig, TrainingHistory};

#[derive(Debug, Clone, Serialize)]
pub struct CifarReport {
    pub architecture: Architecture,
    pub search_kind: SearchKind,
    pub train_size: usize,
    pub test_size: usize,
    pub search: SearchOutcome,
    pub best: Hyperparameters,
    pub history: TrainingHistory,
    pub test: ClassificationReport,
}

/// Trains a freshly initialised network with `params` and returns it with
/// its validation accuracy.
fn train_candidate<R: Rng + ?Sized>(
    config: &CifarConfig,
    params: &Hyperparameters,
    train: &Dataset,
    val: &Dataset,
    rng: &mut R,
) -> Result<(ConvNet, TrainingHistory, f64)> {
    params.validate()?;
    let mut model = ConvNet::build(config.architecture, CLASS_NAMES.len(), config.width, rng);
    let mut optimizer = Optimizer::sgd(params.learning_rate, params.momentum).with_weight_decay(params.weight_decay);
    let train_config = TrainConfig {
        epochs: params.epochs,
        batch_size: params.batch_size,
        patience: None,
        clip_norm: None,
        shuffle: true,
        min_batch: 2,
    };
    let history = fit(&mut model, &mut optimizer, Loss::CrossEntropy, train, val, &train_config, rng)?;
    let accuracy = evaluate(&mut model, Loss::CrossEntropy, val, config.eval_batch_size)?.accuracy();
    Ok((model, history, accuracy))
}

pub fn run(config: &CifarConfig) -> Result<CifarReport> {
    config.validate()?;
    let mut rng = make_rng(config.seed);

    let train_all = load_batches(&config.data_dir, &config.train_files, &config.normalization, config.train_limit)?;
    let test = load_batches(
        &config.data_dir,
        std::slice::from_ref(&config.test_file),
        &config.normalization,
        config.test_limit,
    )?;
    let search_kind = config.search_kind();
    info!(
        architecture = %config.architecture,
        search = ?search_kind,
        train = train_all.len(),
        test = test.len(),
        "loaded CIFAR-10"
    );
    debug!(counts = ?train_all.class_counts(CLASS_NAMES.len()), "training class balance");

    let train_fraction = 1.0 - config.val_fraction;
    let mut trial_rng = StdRng::seed_from_u64(rng.random());
    let search = match search_kind {
        SearchKind::Grid => {
            let (train, val) = train_all.split(train_fraction, true, &mut rng)?;
            grid_search(&config.grid, |_, params| {
                train_candidate(config, params, &train, &val, &mut trial_rng).map(|(_, _, accuracy)| accuracy)
            })?
        }
        SearchKind::Random => random_search(&config.random, config.random_trials, &mut rng, |_, params| {
            let (train, val) = train_all.split(train_fraction, true, &mut trial_rng)?;
            train_candidate(config, params, &train, &val, &mut trial_rng).map(|(_, _, accuracy)| accuracy)
        })?,
    };

    let best = search.best.params;
    info!(
        learning_rate = best.learning_rate,
        epochs = best.epochs,
        batch_size = best.batch_size,
        momentum = best.momentum,
        accuracy = search.best.accuracy,
        "retraining with best hyperparameters"
    );
    let (mut model, history, _) = train_candidate(config, &best, &train_all, &test, &mut rng)?;

    let predictions = predict(&mut model, Loss::CrossEntropy, &test, config.eval_batch_size)?;
    let report = ClassificationReport::multiclass(&predictions.labels, &predictions.classes, CLASS_NAMES.len())?;
    log_report("cifar", &report);
    info!(parameters = model.parameter_count(), "final model");

    Ok(CifarReport {
        architecture: config.architecture,
        search_kind,
        train_size: train_all.len(),
        test_size: test.len(),
        search,
        best,
        history,
        test: report,
    })
}
