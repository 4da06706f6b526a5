//! Read side: paginated listing, point lookup and grouped aggregation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use satlog_normalize::temporal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;
use crate::store::{Category, PageRequest, RecordFilter, RecordStore, StoredRecord};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 1000;
pub const DEFAULT_SERIES_LIMIT: usize = 50;
/// Series label for records without a value in the chosen category.
pub const UNKNOWN_LABEL: &str = "未知";

/// Listing parameters as they arrive from a query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub q: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub customer: Option<String>,
    pub satellite: Option<String>,
    pub station: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub records: Vec<StoredRecord>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
}

impl Granularity {
    /// Bucket label of a civil day.
    pub fn label(&self, day: NaiveDate) -> String {
        match self {
            Granularity::Day => day.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let week = day.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => day.format("%Y-%m").to_string(),
            Granularity::Quarter => format!("{}-Q{}", day.year(), (day.month() - 1) / 3 + 1),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
        })
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "quarter" => Ok(Granularity::Quarter),
            other => Err(format!("'{other}' is not one of day, week, month, quarter")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsParams {
    pub group_by: Option<String>,
    pub category: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub label: String,
    pub data: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub group_by: Granularity,
    pub category: Category,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn RecordStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, params: &ListParams) -> Result<ListPage, QueryError> {
        let page = parse_number("page", params.page.as_deref())?
            .unwrap_or(1)
            .max(1);
        let page_size = parse_number("pageSize", params.page_size.as_deref())?
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let filter = RecordFilter {
            search: params
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
            start: parse_bound("start", params.start.as_deref(), Bound::Lower)?,
            end: parse_bound("end", params.end.as_deref(), Bound::Upper)?,
            customers: split_list(params.customer.as_deref()),
            satellites: split_list(params.satellite.as_deref()),
            stations: split_list(params.station.as_deref()),
        };

        let request = PageRequest {
            offset: (page - 1).saturating_mul(page_size),
            limit: page_size,
        };
        let result = self.store.list(&filter, request).await?;

        Ok(ListPage {
            records: result.records,
            total: result.total,
            page,
            page_size,
        })
    }

    pub async fn get(&self, id: i64) -> Result<StoredRecord, QueryError> {
        self.store.get(id).await?.ok_or(QueryError::NotFound(id))
    }

    /// Record counts bucketed by `groupBy` and broken down by `category`.
    ///
    /// Buckets without any record are omitted; a series that has no record in
    /// a present bucket reports 0 there.
    pub async fn aggregate(&self, params: &StatsParams) -> Result<Aggregation, QueryError> {
        let group_by: Granularity = parse_choice("groupBy", params.group_by.as_deref())?
            .unwrap_or(Granularity::Day);
        let category: Category = parse_choice("category", params.category.as_deref())?
            .unwrap_or(Category::Customer);
        let limit = match parse_number("limit", params.limit.as_deref())? {
            Some(limit) if limit < 1 => {
                return Err(QueryError::invalid("limit", "must be at least 1"));
            }
            Some(limit) => limit as usize,
            None => DEFAULT_SERIES_LIMIT,
        };
        let start = parse_bound("start", params.start.as_deref(), Bound::Lower)?;
        let end = parse_bound("end", params.end.as_deref(), Bound::Upper)?;

        let counts = self.store.daily_counts(category, start, end).await?;

        let labels: Vec<String> = counts
            .iter()
            .map(|count| group_by.label(count.day))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let position: HashMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i))
            .collect();

        let mut by_series: HashMap<String, Vec<i64>> = HashMap::new();
        for count in &counts {
            let series = count
                .category
                .clone()
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
            let bucket = position[group_by.label(count.day).as_str()];
            by_series
                .entry(series)
                .or_insert_with(|| vec![0; labels.len()])[bucket] += count.count;
        }

        let mut series: Vec<Series> = by_series
            .into_iter()
            .map(|(label, data)| Series { label, data })
            .collect();
        series.sort_by(|a, b| {
            let total = |s: &Series| s.data.iter().sum::<i64>();
            total(b).cmp(&total(a)).then_with(|| a.label.cmp(&b.label))
        });
        series.truncate(limit);

        Ok(Aggregation {
            group_by,
            category,
            labels,
            series,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
}

/// Range bounds go through the same normalizer as ingested start times. An
/// upper bound without a time of day covers that whole civil day.
fn parse_bound(
    parameter: &'static str,
    raw: Option<&str>,
    bound: Bound,
) -> Result<Option<DateTime<Utc>>, QueryError> {
    let Some(text) = raw.map(str::trim).filter(|text| !text.is_empty()) else {
        return Ok(None);
    };

    let instant = temporal::normalize(&Value::String(text.to_string()))
        .map_err(|failure| QueryError::invalid(parameter, failure.reason))?;

    if bound == Bound::Upper && is_date_only(text) {
        return Ok(Some(
            instant + Duration::days(1) - Duration::microseconds(1),
        ));
    }
    Ok(Some(instant))
}

fn is_date_only(text: &str) -> bool {
    let numeric = text.bytes().all(|b| b.is_ascii_digit() || b == b'.');
    let has_time = text.contains([':', '时', '点', 'T', 't']);
    // eight-digit compact dates are dates; shorter numbers are serials
    (!numeric || text.len() == 8) && !has_time
}

fn parse_number(parameter: &'static str, raw: Option<&str>) -> Result<Option<i64>, QueryError> {
    match raw.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| QueryError::invalid(parameter, format!("'{text}' is not an integer"))),
        None => Ok(None),
    }
}

fn parse_choice<T>(parameter: &'static str, raw: Option<&str>) -> Result<Option<T>, QueryError>
where
    T: FromStr<Err = String>,
{
    match raw.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|reason| QueryError::invalid(parameter, reason)),
        None => Ok(None),
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|text| {
        text.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(text: &str) -> NaiveDate {
        text.parse().unwrap()
    }

    #[test]
    fn bucket_labels() {
        let d = day("2025-03-01");
        assert_eq!(Granularity::Day.label(d), "2025-03-01");
        assert_eq!(Granularity::Week.label(d), "2025-W09");
        assert_eq!(Granularity::Month.label(d), "2025-03");
        assert_eq!(Granularity::Quarter.label(d), "2025-Q1");
        assert_eq!(Granularity::Quarter.label(day("2025-12-31")), "2025-Q4");
    }

    #[test]
    fn iso_week_year_differs_from_calendar_year() {
        assert_eq!(Granularity::Week.label(day("2024-12-30")), "2025-W01");
        assert_eq!(Granularity::Week.label(day("2021-01-03")), "2020-W53");
    }

    #[test]
    fn upper_date_bound_covers_the_civil_day() {
        let end = parse_bound("end", Some("2025-03-01"), Bound::Upper)
            .unwrap()
            .unwrap();
        assert_eq!(
            temporal::render_civil(&end),
            "2025-03-01 23:59:59"
        );

        let start = parse_bound("start", Some("2025-03-01"), Bound::Lower)
            .unwrap()
            .unwrap();
        assert_eq!(temporal::render_civil(&start), "2025-03-01 00:00:00");

        let exact = parse_bound("end", Some("2025-03-01 12:00:00"), Bound::Upper)
            .unwrap()
            .unwrap();
        assert_eq!(temporal::render_civil(&exact), "2025-03-01 12:00:00");
    }

    #[test]
    fn bad_bounds_name_the_parameter() {
        let err = parse_bound("start", Some("yesterday"), Bound::Lower).unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidParameter {
                parameter: "start",
                ..
            }
        ));
        assert_eq!(parse_bound("start", Some("  "), Bound::Lower).unwrap(), None);
    }

    #[test]
    fn date_only_detection() {
        assert!(is_date_only("2025-03-01"));
        assert!(is_date_only("2025年3月1日"));
        assert!(is_date_only("20250301"));
        assert!(!is_date_only("45658.5"));
        assert!(!is_date_only("2025-03-01T00:00:00Z"));
        assert!(!is_date_only("2025年3月1日9时"));
    }

    #[test]
    fn comma_lists() {
        assert_eq!(split_list(Some("Acme, Beta,,")), vec!["Acme", "Beta"]);
        assert!(split_list(None).is_empty());
    }
}
