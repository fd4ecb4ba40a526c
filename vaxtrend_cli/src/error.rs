use polars::error::PolarsError;
use vaxtrend::error::VaxtrendError;

#[derive(thiserror::Error, Debug)]
pub enum VaxtrendCliError {
    #[error("Anyhow error")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("polars error")]
    PolarsError(#[from] PolarsError),
    #[error("vaxtrend error")]
    VaxtrendError(#[from] VaxtrendError),
    #[error("std IO error")]
    IOError(#[from] std::io::Error),
}

pub type VaxtrendCliResult<T> = Result<T, VaxtrendCliError>;
