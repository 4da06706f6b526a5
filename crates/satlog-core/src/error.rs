// crates/satlog-core/src/error.rs

use std::path::PathBuf;
use std::time::Duration;

use satlog_normalize::RejectedRecord;
use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::auth::AuthorizationFailure;

/// Infrastructure-level failure of the storage collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("stored record {id} could not be decoded: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("plan id '{plan_id}' already belongs to another record")]
    PlanIdTaken { plan_id: String },
}

/// Request-level failure of a batch. Per-record failures never show up here.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationFailure),

    #[error("batch contains no records")]
    EmptyBatch,

    #[error("batch of {size} records exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("batch did not finish within {0:?}; the transaction was rolled back")]
    Timeout(Duration),

    #[error("transaction fault: {0}")]
    Transaction(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid {parameter}: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },

    #[error("record {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        QueryError::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Failure of a single-record update or delete.
#[derive(Error, Debug)]
pub enum EditError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationFailure),

    #[error("record rejected: {}", .0.failure)]
    Rejected(RejectedRecord),

    #[error("record {0} not found")]
    NotFound(i64),

    #[error("no record has plan id '{0}'")]
    PlanNotFound(String),

    #[error("plan id '{0}' already belongs to another record")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EditError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PlanIdTaken { plan_id } => EditError::Conflict(plan_id),
            other => EditError::Store(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResetError {
    #[error(transparent)]
    Unauthorized(#[from] AuthorizationFailure),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    InvalidEnv { key: &'static str, reason: String },

    #[error("DATABASE_URL (or SATLOG_DATABASE_URL) must be set")]
    MissingDatabaseUrl,
}
