//! Small neural-network toolkit on `ndarray` and three classification
//! experiments built on it: a GRU over daily stock features, convolutional
//! networks over CIFAR-10 with hyperparameter search, and a perceptron over
//! the Pima diabetes table.

pub mod activation;
pub mod config;
pub mod data;
pub mod error;
pub mod experiments;
pub mod hyperparameters;
pub mod layers;
pub mod loss;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod search;
pub mod training;

pub use activation::ActivationType;
pub use error::{Error, Result};
pub use hyperparameters::{GridSpace, Hyperparameters, RandomSpace};
pub use layers::{Layer, Mode, Parameter, Tensor};
pub use loss::Loss;
pub use models::{ConvNet, GruClassifier, Network, Perceptron};
pub use optimizer::Optimizer;
