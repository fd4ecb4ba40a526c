//! Error types.

#[derive(thiserror::Error, Debug)]
pub enum VaxtrendError {
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
    #[error("Registry file not found: {0}")]
    RegistryNotFound(String),
    #[error("Missing required column: {0}")]
    MissingColumn(String),
    #[error("Not enough history to fit a trend: {0}")]
    InsufficientHistory(String),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Unknown error.")]
    Unknown,
}
