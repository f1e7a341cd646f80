use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors. Any of these aborts the batch run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema mismatch: missing required columns {missing:?}")]
    Schema { missing: Vec<String> },

    #[error("Model fit failed: {0}")]
    ModelFit(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Per-record errors. These are routed to the rejects sink and never abort a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("malformed row: {0}")]
    Parse(String),

    #[error("unparseable filing date '{0}'")]
    InvalidDate(String),

    #[error("no price index for year {0}")]
    MissingIndex(i32),
}

impl RecordError {
    pub fn kind(&self) -> RejectKind {
        match self {
            RecordError::Parse(_) => RejectKind::ParseError,
            RecordError::InvalidDate(_) => RejectKind::InvalidDateError,
            RecordError::MissingIndex(_) => RejectKind::MissingIndexError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectKind {
    ParseError,
    InvalidDateError,
    MissingIndexError,
}

impl RejectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectKind::ParseError => "parse_error",
            RejectKind::InvalidDateError => "invalid_date",
            RejectKind::MissingIndexError => "missing_index",
        }
    }
}

/// A geographic cohort whose price-per-area dispersion cannot produce a Z-score.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("degenerate statistics for '{geo_key}': {observations} observation(s), stddev {stddev}")]
pub struct DegenerateStatisticsError {
    pub geo_key: String,
    pub observations: usize,
    pub stddev: f64,
}
