use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
    #[error("unknown distance metric: {0}")]
    UnknownMetric(String),
    #[error("unknown score reduction: {0}")]
    UnknownReduction(String),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("class {class:?} not found in vocabulary {vocabulary:?}")]
    MissingClass {
        class: String,
        vocabulary: Vec<String>,
    },
    #[error("no embedding for sample {0:?}")]
    MissingEmbedding(PathBuf),
    #[error("source dataset not found: {0:?}")]
    MissingSource(PathBuf),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl From<anyhow::Error> for EvalError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(format!("{value:#}"))
    }
}
