use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("column `{0}` not found")]
    MissingColumn(String),

    #[error("row {row}, column `{column}`: cannot parse `{value}` as a number")]
    Parse {
        row: usize,
        column: String,
        value: String,
    },

    #[error("input size does not match {layer}: expected {expected}, got {actual}")]
    ShapeMismatch {
        layer: &'static str,
        expected: String,
        actual: String,
    },

    #[error("{0}: backward called before forward")]
    MissingCache(&'static str),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("non-finite training loss at epoch {epoch}")]
    NonFiniteLoss { epoch: usize },

    #[error("hyperparameter search space is empty")]
    EmptySearchSpace,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn shape_mismatch(
        layer: &'static str,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Error::ShapeMismatch {
            layer,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}
