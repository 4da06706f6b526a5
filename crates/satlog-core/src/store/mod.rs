//! Storage collaborator: the only component that touches persisted records.

mod memory;
mod postgres;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use satlog_normalize::temporal::serialize_civil;
use satlog_normalize::CanonicalRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// How a record whose plan identifier already exists is handled. Applied
/// uniformly to every record of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Keep the stored row untouched.
    #[default]
    Skip,
    /// Overwrite descriptive fields, keeping the original `created_at`.
    Upsert,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Skip => "skip",
            DuplicatePolicy::Upsert => "upsert",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(DuplicatePolicy::Skip),
            "upsert" => Ok(DuplicatePolicy::Upsert),
            other => Err(format!("unknown duplicate policy '{other}' (expected skip or upsert)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    Inserted,
    Updated,
    Skipped,
}

/// A persisted record as handed back to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: i64,
    #[serde(flatten)]
    pub record: CanonicalRecord,
    #[serde(serialize_with = "serialize_civil")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_civil")]
    pub updated_at: DateTime<Utc>,
}

/// Row written to the batch audit table on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAudit {
    pub batch_id: Uuid,
    pub digest: String,
    pub policy: DuplicatePolicy,
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Dimensions a record count can be broken down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Customer,
    Satellite,
    Station,
    TaskResult,
    TaskType,
}

impl Category {
    pub fn column(&self) -> &'static str {
        match self {
            Category::Customer => "customer",
            Category::Satellite => "satellite",
            Category::Station => "station",
            Category::TaskResult => "task_result",
            Category::TaskType => "task_type",
        }
    }

    pub fn value_of<'a>(&self, record: &'a CanonicalRecord) -> Option<&'a str> {
        match self {
            Category::Customer => record.customer.as_deref(),
            Category::Satellite => record.satellite.as_deref(),
            Category::Station => record.station.as_deref(),
            Category::TaskResult => record.task_result.as_deref(),
            Category::TaskType => record.task_type.as_deref(),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "customer" => Ok(Category::Customer),
            "satellite" => Ok(Category::Satellite),
            "station" => Ok(Category::Station),
            "taskResult" | "task_result" => Ok(Category::TaskResult),
            "taskType" | "task_type" => Ok(Category::TaskType),
            other => Err(format!(
                "'{other}' is not one of customer, station, satellite, taskResult, taskType"
            )),
        }
    }
}

/// Listing filter. Bounds are inclusive; list fields match exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub search: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub customers: Vec<String>,
    pub satellites: Vec<String>,
    pub stations: Vec<String>,
}

impl RecordFilter {
    pub(crate) fn matches(&self, record: &CanonicalRecord) -> bool {
        if self.start.is_some_and(|start| record.start_time < start)
            || self.end.is_some_and(|end| record.start_time > end)
        {
            return false;
        }

        let listed = |allowed: &[String], value: Option<&str>| {
            allowed.is_empty() || value.is_some_and(|v| allowed.iter().any(|a| a == v))
        };
        if !listed(&self.customers, record.customer.as_deref())
            || !listed(&self.satellites, record.satellite.as_deref())
            || !listed(&self.stations, record.station.as_deref())
        {
            return false;
        }

        match &self.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                [
                    &record.plan_id,
                    &record.customer,
                    &record.satellite,
                    &record.station,
                ]
                .into_iter()
                .flatten()
                .any(|value| value.to_lowercase().contains(&needle))
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    pub records: Vec<StoredRecord>,
    pub total: i64,
}

/// Number of records starting on one civil day with one category value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCount {
    pub day: NaiveDate,
    pub category: Option<String>,
    pub count: i64,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Opens a transaction owned exclusively by one batch.
    async fn begin(&self) -> Result<Box<dyn IngestTransaction>, StoreError>;

    async fn list(&self, filter: &RecordFilter, page: PageRequest)
        -> Result<RecordPage, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<StoredRecord>, StoreError>;

    /// Replaces every field of record `id` with `record`, keeping its
    /// `created_at` and refreshing `updated_at`. `None` when `id` is unknown;
    /// [`StoreError::PlanIdTaken`] when another record already owns the new
    /// plan identifier.
    async fn update(
        &self,
        id: i64,
        record: &CanonicalRecord,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;

    async fn delete_by_plan(&self, plan_id: &str) -> Result<u64, StoreError>;

    /// Counts grouped by civil (UTC+8) start day and `category`, restricted
    /// to the inclusive `[start, end]` range.
    async fn daily_counts(
        &self,
        category: Category,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<DailyCount>, StoreError>;

    /// Deletes every record and audit row. Returns the number of records removed.
    async fn clear(&self) -> Result<u64, StoreError>;
}

/// Writes staged inside one transaction. Dropping it without calling
/// [`IngestTransaction::commit`] discards everything staged.
#[async_trait]
pub trait IngestTransaction: Send {
    async fn stage(
        &mut self,
        record: &CanonicalRecord,
        policy: DuplicatePolicy,
    ) -> Result<StageAction, StoreError>;

    async fn record_batch(&mut self, audit: &BatchAudit) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
