use serde_json::{Map, Value};

use crate::model::{CanonicalField, ResolvedRecord};

/// Ordered alias list per canonical field. The first alias carrying a
/// non-empty value wins.
pub const FIELD_ALIASES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::PlanId,
        &["计划ID", "任务ID", "计划编号", "planId", "plan_id", "PlanID"],
    ),
    (
        CanonicalField::StartTime,
        &["开始时间", "启动时间", "计划开始时间", "startTime", "start_time", "StartTime"],
    ),
    (
        CanonicalField::Customer,
        &["所属客户", "客户名称", "客户", "customer", "customerName", "customer_name"],
    ),
    (
        CanonicalField::Satellite,
        &["卫星名称", "卫星名", "卫星", "satellite", "satelliteName", "satellite_name"],
    ),
    (
        CanonicalField::Station,
        &["测站名称", "站点名称", "测站", "station", "stationName", "station_name"],
    ),
    (
        CanonicalField::TaskResult,
        &[
            "任务结果状态",
            "任务状态",
            "任务结果",
            "taskResult",
            "task_result",
            "taskStatus",
            "task_status",
        ],
    ),
    (
        CanonicalField::TaskType,
        &["任务类型", "taskType", "task_type"],
    ),
];

pub fn aliases_for(field: CanonicalField) -> &'static [&'static str] {
    FIELD_ALIASES
        .iter()
        .find(|(candidate, _)| *candidate == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

/// Maps an arbitrary input object onto the canonical field set.
///
/// Never fails: a field without a matching alias resolves to `None` and is
/// listed in [`ResolvedRecord::gaps`]. Inputs that are not JSON objects
/// resolve every field to `None`.
pub fn resolve(raw: &Value) -> ResolvedRecord {
    let empty = Map::new();
    let object = raw.as_object().unwrap_or(&empty);
    let mut gaps = Vec::new();

    let mut text = |field: CanonicalField| {
        let value = first_match(object, aliases_for(field), text_value);
        if value.is_none() {
            gaps.push(field);
        }
        value
    };

    let plan_id = text(CanonicalField::PlanId);
    let customer = text(CanonicalField::Customer);
    let satellite = text(CanonicalField::Satellite);
    let station = text(CanonicalField::Station);
    let task_result = text(CanonicalField::TaskResult);
    let task_type = text(CanonicalField::TaskType);

    let start_time = first_match(object, aliases_for(CanonicalField::StartTime), |value| {
        is_present(value).then(|| value.clone())
    });
    if start_time.is_none() {
        gaps.push(CanonicalField::StartTime);
    }

    ResolvedRecord {
        plan_id,
        start_time,
        customer,
        satellite,
        station,
        task_result,
        task_type,
        raw: raw.clone(),
        gaps,
    }
}

fn first_match<'a, T>(
    object: &'a Map<String, Value>,
    aliases: &[&str],
    convert: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    aliases.iter().find_map(|alias| {
        let value = object.get(*alias).or_else(|| {
            // spreadsheet headers frequently carry stray whitespace
            object
                .iter()
                .find(|(key, _)| key.trim() == *alias)
                .map(|(_, value)| value)
        })?;
        convert(value)
    })
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Some(i.to_string()),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", f as i64)),
            _ => Some(n.to_string()),
        },
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
