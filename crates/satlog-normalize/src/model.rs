use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// The fixed set of fields a task record is normalized onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    PlanId,
    StartTime,
    Customer,
    Satellite,
    Station,
    TaskResult,
    TaskType,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 7] = [
        CanonicalField::PlanId,
        CanonicalField::StartTime,
        CanonicalField::Customer,
        CanonicalField::Satellite,
        CanonicalField::Station,
        CanonicalField::TaskResult,
        CanonicalField::TaskType,
    ];

    pub fn canonical_name(&self) -> &'static str {
        match self {
            CanonicalField::PlanId => "planId",
            CanonicalField::StartTime => "startTime",
            CanonicalField::Customer => "customer",
            CanonicalField::Satellite => "satellite",
            CanonicalField::Station => "station",
            CanonicalField::TaskResult => "taskResult",
            CanonicalField::TaskType => "taskType",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Output of the field resolver. The start time is still the raw input value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedRecord {
    pub plan_id: Option<String>,
    pub start_time: Option<Value>,
    pub customer: Option<String>,
    pub satellite: Option<String>,
    pub station: Option<String>,
    pub task_result: Option<String>,
    pub task_type: Option<String>,
    pub raw: Value,
    /// Canonical fields that no alias matched.
    pub gaps: Vec<CanonicalField>,
}

/// The normalized record that gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub plan_id: Option<String>,
    #[serde(serialize_with = "crate::temporal::serialize_civil")]
    pub start_time: DateTime<Utc>,
    pub customer: Option<String>,
    pub satellite: Option<String>,
    pub station: Option<String>,
    pub task_result: Option<String>,
    pub task_type: Option<String>,
    pub raw: Value,
}
