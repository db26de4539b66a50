use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::cifar::Normalization;
use crate::error::{Error, Result};
use crate::hyperparameters::{GridSpace, Hyperparameters, RandomSpace};
use crate::models::convnet::Architecture;
use crate::training::TrainConfig;

/// Reads a TOML experiment configuration; absent fields take their defaults.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = toml::from_str(&text)?;
    info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Seeded generator when `seed` is set, OS entropy otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockConfig {
    pub data_path: PathBuf,
    pub seed: Option<u64>,
    /// Rows are listed most recent first and must be reversed.
    pub newest_first: bool,
    pub currency_columns: Vec<String>,
    pub feature_columns: Vec<String>,
    pub price_column: String,
    pub moving_averages: Vec<usize>,
    /// Rows ahead used for the label.
    pub horizon: usize,
    /// Minimum fractional rise for a positive label.
    pub threshold: f64,
    pub window: usize,
    pub train_fraction: f64,
    pub val_fraction: f64,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub dropout: f32,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub training: TrainConfig,
}

impl Default for StockConfig {
    fn default() -> Self {
        StockConfig {
            data_path: PathBuf::from("data/stock.csv"),
            seed: None,
            newest_first: true,
            currency_columns: ["Close/Last", "Open", "High", "Low"].map(String::from).to_vec(),
            feature_columns: ["Open", "High", "Low", "Close/Last", "Volume"].map(String::from).to_vec(),
            price_column: "Close/Last".into(),
            moving_averages: vec![10, 50],
            horizon: 48,
            threshold: 0.05,
            window: 30,
            train_fraction: 0.7,
            val_fraction: 0.15,
            hidden_size: 64,
            num_layers: 2,
            dropout: 0.2,
            learning_rate: 0.001,
            weight_decay: 0.0,
            training: TrainConfig {
                epochs: 50,
                batch_size: 32,
                patience: Some(5),
                clip_norm: Some(1.0),
                shuffle: true,
                min_batch: 1,
            },
        }
    }
}

impl StockConfig {
    pub fn validate(&self) -> Result<()> {
        check_fraction("train_fraction", self.train_fraction)?;
        check_fraction("val_fraction", self.val_fraction)?;
        if self.train_fraction + self.val_fraction >= 1.0 {
            return Err(Error::InvalidConfig("train and validation fractions leave no test data".into()));
        }
        if !self.feature_columns.contains(&self.price_column) {
            return Err(Error::InvalidConfig(format!(
                "price column {} must be one of the feature columns",
                self.price_column
            )));
        }
        if self.window == 0 || self.horizon == 0 {
            return Err(Error::InvalidConfig("window and horizon must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        if self.hidden_size == 0 || self.num_layers == 0 {
            return Err(Error::InvalidConfig("hidden_size and num_layers must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiabetesConfig {
    pub data_path: PathBuf,
    pub seed: Option<u64>,
    pub target_column: String,
    /// Columns where a zero means "not measured".
    pub zero_missing_columns: Vec<String>,
    pub knn_neighbors: usize,
    pub test_fraction: f64,
    /// Probability at or above which a sample is predicted positive.
    pub threshold: f64,
    pub learning_rate: f32,
    pub momentum: f32,
    pub training: TrainConfig,
}

impl Default for DiabetesConfig {
    fn default() -> Self {
        DiabetesConfig {
            data_path: PathBuf::from("data/diabetes.csv"),
            seed: None,
            target_column: "Outcome".into(),
            zero_missing_columns: ["Glucose", "BloodPressure", "SkinThickness", "Insulin", "BMI"]
                .map(String::from)
                .to_vec(),
            knn_neighbors: 5,
            test_fraction: 0.2,
            threshold: 0.5,
            learning_rate: 0.01,
            momentum: 0.0,
            training: TrainConfig {
                epochs: 100,
                batch_size: 32,
                ..TrainConfig::default()
            },
        }
    }
}

impl DiabetesConfig {
    pub fn validate(&self) -> Result<()> {
        check_fraction("test_fraction", self.test_fraction)?;
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidConfig(format!("threshold must be a probability, got {}", self.threshold)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Grid,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CifarConfig {
    pub data_dir: PathBuf,
    pub seed: Option<u64>,
    pub train_files: Vec<String>,
    pub test_file: String,
    pub train_limit: Option<usize>,
    pub test_limit: Option<usize>,
    pub normalization: Normalization,
    pub architecture: Architecture,
    /// Search strategy; `None` pairs grid search with MobileNetV2 and random
    /// search with ResNet18.
    pub search: Option<SearchKind>,
    /// Width multiplier (MobileNetV2) or first-stage width over 64 (ResNet18).
    pub width: f32,
    pub val_fraction: f64,
    pub grid: GridSpace,
    pub random: RandomSpace,
    pub random_trials: usize,
    /// Batch size used for the test pass.
    pub eval_batch_size: usize,
}

impl Default for CifarConfig {
    fn default() -> Self {
        CifarConfig {
            data_dir: PathBuf::from("data/cifar-10-batches-bin"),
            seed: None,
            train_files: (1..=5).map(|i| format!("data_batch_{}.bin", i)).collect(),
            test_file: "test_batch.bin".into(),
            train_limit: None,
            test_limit: None,
            normalization: Normalization::default(),
            architecture: Architecture::MobileNetV2,
            search: None,
            width: 1.0,
            val_fraction: 0.2,
            grid: GridSpace {
                epochs: vec![10, 20],
                learning_rates: vec![0.01, 0.001],
                base: Hyperparameters {
                    batch_size: 64,
                    momentum: 0.9,
                    weight_decay: 4e-5,
                    ..Hyperparameters::default()
                },
            },
            random: RandomSpace {
                base: Hyperparameters {
                    weight_decay: 5e-4,
                    ..Hyperparameters::default()
                },
                ..RandomSpace::default()
            },
            random_trials: 5,
            eval_batch_size: 256,
        }
    }
}

impl CifarConfig {
    pub fn search_kind(&self) -> SearchKind {
        self.search.unwrap_or(match self.architecture {
            Architecture::MobileNetV2 => SearchKind::Grid,
            Architecture::ResNet18 => SearchKind::Random,
        })
    }

    pub fn validate(&self) -> Result<()> {
        check_fraction("val_fraction", self.val_fraction)?;
        if !(self.width > 0.0) {
            return Err(Error::InvalidConfig(format!("width must be positive, got {}", self.width)));
        }
        if self.normalization.std.iter().any(|&s| s <= 0.0) {
            return Err(Error::InvalidConfig("normalisation std must be positive".into()));
        }
        match self.search_kind() {
            SearchKind::Grid if self.grid.is_empty() => Err(Error::EmptySearchSpace),
            SearchKind::Random if self.random_trials == 0 => Err(Error::EmptySearchSpace),
            SearchKind::Random => self.random.validate(),
            SearchKind::Grid => Ok(()),
        }
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("{} must be in (0, 1), got {}", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = 7\nwindow = 10\n[training]\nepochs = 3").unwrap();
        let config: StockConfig = load_config(file.path()).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.window, 10);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.horizon, 48);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_search_pairing() {
        let mut config = CifarConfig::default();
        assert_eq!(config.search_kind(), SearchKind::Grid);
        config.architecture = Architecture::ResNet18;
        assert_eq!(config.search_kind(), SearchKind::Random);
        config.search = Some(SearchKind::Grid);
        assert_eq!(config.search_kind(), SearchKind::Grid);
    }

    #[test]
    fn test_cifar_config_from_toml() {
        let config: CifarConfig = toml::from_str(
            r#"
            architecture = "resnet18"
            random_trials = 2
            [random]
            batch_sizes = [8]
            epochs = [1, 2]
            "#,
        )
        .unwrap();
        assert_eq!(config.architecture, Architecture::ResNet18);
        assert_eq!(config.random.epochs, (1, 2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_fractions() {
        let config = StockConfig {
            train_fraction: 0.9,
            val_fraction: 0.15,
            ..StockConfig::default()
        };
        assert!(config.validate().is_err());
        for dropout in [1.0, -0.1] {
            let config = StockConfig {
                dropout,
                ..StockConfig::default()
            };
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
        let config = DiabetesConfig {
            test_fraction: 1.0,
            ..DiabetesConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seeded_rngs_agree() {
        use rand::Rng;
        let a: u64 = make_rng(Some(3)).random();
        let b: u64 = make_rng(Some(3)).random();
        assert_eq!(a, b);
    }
}
