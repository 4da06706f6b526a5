use serde_json::Value;
use thiserror::Error;

use crate::model::CanonicalField;

/// A start-time value that could not be turned into an instant.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot normalize start time {original}: {reason}")]
pub struct NormalizationFailure {
    pub original: Value,
    pub reason: String,
}

impl NormalizationFailure {
    pub fn new(original: &Value, reason: impl Into<String>) -> Self {
        Self {
            original: original.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {reason}")]
pub struct ValidationError {
    pub field: CanonicalField,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: CanonicalField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Why a single record was rejected. Fatal to that record only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordFailure {
    #[error(transparent)]
    Normalization(#[from] NormalizationFailure),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl RecordFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordFailure::Normalization(_) => "normalization",
            RecordFailure::Validation(_) => "validation",
        }
    }
}

/// A rejected record together with the verbatim temporal value it carried.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub failure: RecordFailure,
    pub original_value: Option<Value>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("JSON input could not be decoded: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV input could not be decoded: {0}")]
    Csv(#[from] csv::Error),

    #[error("expected a JSON array of records or an object with a `records` array")]
    NotABatch,
}
