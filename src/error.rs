//! Error types for the ingestion, forecasting and reporting stages.

use chrono::NaiveDate;
use thiserror::Error;

/// Failures while turning raw rows into validated appointments.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Required field missing or malformed
    #[error("schema error on row {row}, field `{field}`: {reason}")]
    Schema {
        row: usize,
        field: String,
        reason: String,
    },

    /// Appointment logged after the day it occurs
    #[error("data integrity error on row {row}: date_creation {date_creation} is after date_rdv {date_rdv}")]
    DataIntegrity {
        row: usize,
        date_creation: NaiveDate,
        date_rdv: NaiveDate,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn schema(row: usize, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            row,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Persistence failures of a cached forecast model.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("model cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid model cache key: {0:?}")]
    InvalidKey(String),

    /// Stored artifact that deserialises but cannot be projected
    #[error("cached model {key:?} is unusable: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("insufficient data: {available} weeks available, {required} required")]
    InsufficientData { available: usize, required: usize },

    /// Smoothing fit did not converge or produced non-finite values
    #[error("model fit failed: {0}")]
    ModelFit(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// A report section that could not be rendered.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("section `{section}` unavailable: {reason}")]
    Unavailable { section: String, reason: String },

    #[error("forecast unavailable: {0}")]
    Forecast(#[from] ForecastError),
}
