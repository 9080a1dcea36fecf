use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures while turning an uploaded file into a price series.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("the uploaded file is empty")]
    Empty,
    #[error("no file was attached to the upload (expected a form field named 'file')")]
    MissingFile,
    #[error("unsupported file type '.{extension}'; upload CSV, TSV, TXT or an Excel/ODS workbook")]
    UnsupportedFormat { extension: String },
    #[error("could not read the spreadsheet: {reason}")]
    Workbook { reason: String },
    #[error("file is not valid UTF-8 or Latin-1 text")]
    Encoding,
    #[error("could not parse the file as delimited text: {reason}")]
    Malformed { reason: String },
    #[error("no numeric price column found (looked for close, price, last, value)")]
    NoPriceColumn,
    #[error("no rows with a usable date and price were found")]
    NoUsableRows,
}

/// Failures reported by the forecast adapter or a model behind it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForecastError {
    #[error("not enough data to forecast: need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("forecast horizon must be between 1 and {max}, got {got}")]
    InvalidHorizon { got: usize, max: usize },
    #[error("model produced {got} points for a horizon of {expected}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("unknown forecast model '{0}', expected linear or moving_average")]
    UnknownModel(String),
}

/// Controller-level lookups.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DashboardError {
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("history length must be between {min} and {max} days, got {got}")]
    InvalidRange { got: usize, min: usize, max: usize },
    #[error("no trading session could be scheduled around {0}")]
    NoSession(DateTime<Utc>),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
}
