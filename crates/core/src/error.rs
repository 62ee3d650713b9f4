use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("unreadable image: {0:?}")]
    UnreadableImage(PathBuf),
    #[error("worker error: {0}")]
    Worker(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;

impl From<anyhow::Error> for ReportError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
