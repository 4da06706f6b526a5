use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::ValidationError;
use crate::model::{CanonicalField, CanonicalRecord, ResolvedRecord};

pub const DEFAULT_TASK_RESULTS: &[&str] = &["成功", "失败", "进行中", "未开始"];

/// Which enumerations are checked. Descriptive fields are never required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationPolicy {
    pub enforce_enums: bool,
    pub task_results: Vec<String>,
    /// Empty means any task type is admissible.
    pub task_types: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            enforce_enums: false,
            task_results: DEFAULT_TASK_RESULTS.iter().map(|s| s.to_string()).collect(),
            task_types: Vec::new(),
        }
    }
}

impl ValidationPolicy {
    pub fn enforcing() -> Self {
        Self {
            enforce_enums: true,
            ..Self::default()
        }
    }
}

/// Builds the canonical record once the start time has been normalized.
///
/// `start_time` is `None` when the resolved record carried no temporal value.
pub fn validate(
    resolved: ResolvedRecord,
    start_time: Option<DateTime<Utc>>,
    policy: &ValidationPolicy,
) -> Result<CanonicalRecord, ValidationError> {
    let start_time = start_time
        .ok_or_else(|| ValidationError::new(CanonicalField::StartTime, "is required"))?;

    if policy.enforce_enums {
        check_allowed(
            CanonicalField::TaskResult,
            resolved.task_result.as_deref(),
            &policy.task_results,
        )?;
        check_allowed(
            CanonicalField::TaskType,
            resolved.task_type.as_deref(),
            &policy.task_types,
        )?;
    }

    Ok(CanonicalRecord {
        plan_id: resolved.plan_id,
        start_time,
        customer: resolved.customer,
        satellite: resolved.satellite,
        station: resolved.station,
        task_result: resolved.task_result,
        task_type: resolved.task_type,
        raw: resolved.raw,
    })
}

fn check_allowed(
    field: CanonicalField,
    value: Option<&str>,
    allowed: &[String],
) -> Result<(), ValidationError> {
    match value {
        Some(value) if !allowed.is_empty() && !allowed.iter().any(|a| a == value) => Err(
            ValidationError::new(field, format!("'{value}' is not one of {}", allowed.join(", "))),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolved(task_result: Option<&str>, task_type: Option<&str>) -> ResolvedRecord {
        ResolvedRecord {
            plan_id: Some("P1".into()),
            task_result: task_result.map(Into::into),
            task_type: task_type.map(Into::into),
            raw: json!({}),
            ..ResolvedRecord::default()
        }
    }

    fn instant() -> DateTime<Utc> {
        "2025-03-01T01:30:00Z".parse().unwrap()
    }

    #[test]
    fn start_time_is_required() {
        let err = validate(resolved(None, None), None, &ValidationPolicy::default()).unwrap_err();
        assert_eq!(err.field, CanonicalField::StartTime);
        assert_eq!(err.to_string(), "startTime is required");
    }

    #[test]
    fn descriptive_fields_may_be_null() {
        let record =
            validate(resolved(None, None), Some(instant()), &ValidationPolicy::enforcing())
                .unwrap();
        assert!(record.customer.is_none());
        assert!(record.task_result.is_none());
        assert_eq!(record.start_time, instant());
    }

    #[test]
    fn enums_are_ignored_unless_enforced() {
        let record = validate(
            resolved(Some("whatever"), None),
            Some(instant()),
            &ValidationPolicy::default(),
        )
        .unwrap();
        assert_eq!(record.task_result.as_deref(), Some("whatever"));
    }

    #[test]
    fn enforced_task_result_allow_list() {
        let policy = ValidationPolicy::enforcing();
        assert!(validate(resolved(Some("成功"), None), Some(instant()), &policy).is_ok());

        let err = validate(resolved(Some("unknown"), None), Some(instant()), &policy).unwrap_err();
        assert_eq!(err.field, CanonicalField::TaskResult);
        assert!(err.reason.contains("成功"));
    }

    #[test]
    fn task_types_checked_only_when_listed() {
        let mut policy = ValidationPolicy::enforcing();
        assert!(validate(resolved(None, Some("测控")), Some(instant()), &policy).is_ok());

        policy.task_types = vec!["数传".into()];
        let err = validate(resolved(None, Some("测控")), Some(instant()), &policy).unwrap_err();
        assert_eq!(err.field, CanonicalField::TaskType);
    }
}
