//! Core data types for KPI requests and responses.
//!
//! This module defines the value types that flow between the engines:
//!
//! - [`YearMonth`] - A validated calendar month
//! - [`KpiFilters`] - What a dashboard asks for
//! - [`KpiRequest`] - A resolved upstream request (epoch-ms range and flags)
//! - [`RawPeriodRecord`] - One upstream `dataList` row after schema validation
//! - [`KpiResponse`] - A validated upstream response
//! - [`KpiViewModel`] - A formatted KPI ready for display

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{KpiError, Result};
use crate::period::MONTH_KEYS;

/// Named numeric metrics (e.g. `revenue`, `expenses`), ordered by name.
pub type Metrics = BTreeMap<String, f64>;

/// Field names accepted as the period label of an upstream row, in priority order.
pub const LABEL_ALIASES: &[&str] = &["month", "label", "period", "name"];

/// A calendar month.
///
/// Serialized as `yyyy-MM`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    first_day: NaiveDate,
}

impl YearMonth {
    /// Creates a month from a year and a 1-based month number.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|first_day| Self { first_day })
            .ok_or_else(|| KpiError::InvalidParameter(format!("Invalid month: {year}-{month}")))
    }

    /// Returns the month containing the given date.
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    /// Calendar year.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    /// 1-based month number.
    #[must_use]
    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    /// 0-based month index.
    #[must_use]
    pub fn month_index(&self) -> u32 {
        self.first_day.month0()
    }

    /// First instant of the month in UTC.
    #[must_use]
    pub fn month_start_utc(&self) -> DateTime<Utc> {
        self.first_day.and_time(NaiveTime::MIN).and_utc()
    }

    /// Last millisecond of the month in UTC.
    #[must_use]
    pub fn month_end_utc(&self) -> DateTime<Utc> {
        let next = self
            .first_day
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX);
        next.and_time(NaiveTime::MIN).and_utc() - chrono::TimeDelta::milliseconds(1)
    }

    /// First instant of the month's calendar year in UTC.
    #[must_use]
    pub fn year_start_utc(&self) -> DateTime<Utc> {
        Self::from_date(self.first_day.with_month(1).unwrap_or(self.first_day)).month_start_utc()
    }

    /// Last millisecond of the month's calendar year in UTC.
    #[must_use]
    pub fn year_end_utc(&self) -> DateTime<Utc> {
        Self::from_date(self.first_day.with_month(12).unwrap_or(self.first_day)).month_end_utc()
    }

    /// Display label such as `Dec 2025`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", MONTH_KEYS[self.month_index() as usize], self.year())
    }

    /// Wire form used for the `compareMonth` parameter, e.g. `2025-12`.
    #[must_use]
    pub fn compare_key(&self) -> String {
        format!("{:04}-{:02}", self.year(), self.month())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compare_key())
    }
}

impl FromStr for YearMonth {
    type Err = KpiError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || KpiError::InvalidParameter(format!("Expected yyyy-MM, got {s:?}"));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = KpiError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.compare_key()
    }
}

/// Filters a dashboard supplies to start a fetch cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiFilters {
    /// The selected month.
    pub month: YearMonth,
    /// Optional baseline month for comparison mode.
    #[serde(default)]
    pub compare_month: Option<YearMonth>,
    /// Dimension filters (clinic, region, tenant, ...), sent verbatim.
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

impl KpiFilters {
    /// Creates filters for a single month with no comparison.
    #[must_use]
    pub const fn new(month: YearMonth) -> Self {
        Self {
            month,
            compare_month: None,
            dimensions: BTreeMap::new(),
        }
    }

    /// Enables comparison mode against the given baseline month.
    #[must_use]
    pub const fn with_compare_month(mut self, compare_month: YearMonth) -> Self {
        self.compare_month = Some(compare_month);
        self
    }

    /// Adds a dimension filter.
    #[must_use]
    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(name.into(), value.into());
        self
    }

    /// Returns true when a baseline month was requested.
    #[must_use]
    pub const fn is_comparison(&self) -> bool {
        self.compare_month.is_some()
    }
}

/// A resolved upstream request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiRequest {
    /// Range start, epoch milliseconds (inclusive).
    pub start_ms: i64,
    /// Range end, epoch milliseconds (inclusive).
    pub end_ms: i64,
    /// Whether the upstream should treat this as a comparison request.
    pub is_compare_month: bool,
    /// Baseline month sent alongside a comparison request.
    pub compare_month: Option<YearMonth>,
    /// Dimension filters.
    pub dimensions: BTreeMap<String, String>,
}

impl KpiRequest {
    /// Request for the selected month, flagged as a comparison when a baseline is set.
    #[must_use]
    pub fn primary(filters: &KpiFilters) -> Self {
        Self {
            start_ms: filters.month.month_start_utc().timestamp_millis(),
            end_ms: filters.month.month_end_utc().timestamp_millis(),
            is_compare_month: filters.compare_month.is_some(),
            compare_month: filters.compare_month,
            dimensions: filters.dimensions.clone(),
        }
    }

    /// Request for the baseline month, if comparison mode is on.
    #[must_use]
    pub fn baseline(filters: &KpiFilters) -> Option<Self> {
        filters.compare_month.map(|baseline| Self {
            start_ms: baseline.month_start_utc().timestamp_millis(),
            end_ms: baseline.month_end_utc().timestamp_millis(),
            is_compare_month: false,
            compare_month: None,
            dimensions: filters.dimensions.clone(),
        })
    }

    /// Request covering the whole calendar year of the selected month.
    #[must_use]
    pub fn year(filters: &KpiFilters) -> Self {
        Self {
            start_ms: filters.month.year_start_utc().timestamp_millis(),
            end_ms: filters.month.year_end_utc().timestamp_millis(),
            is_compare_month: false,
            compare_month: None,
            dimensions: filters.dimensions.clone(),
        }
    }
}

/// One upstream `dataList` row after schema validation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPeriodRecord {
    /// Period label as received.
    pub label: String,
    /// Numeric fields of the row.
    pub metrics: Metrics,
}

impl RawPeriodRecord {
    /// Creates a record from a label and metrics.
    #[must_use]
    pub fn new(label: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            label: label.into(),
            metrics,
        }
    }

    /// Adds a single metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Maps an arbitrary upstream row onto a record.
    ///
    /// The label is taken from the first [`LABEL_ALIASES`] field holding a
    /// non-empty string. Every other numeric field (JSON number or numeric
    /// string) becomes a metric. Rows that are not objects or carry no label
    /// are rejected with [`KpiError::Validation`].
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(row) = value else {
            return Err(KpiError::Validation(format!(
                "Expected an object row, got {}",
                json_kind(value)
            )));
        };

        let label = LABEL_ALIASES
            .iter()
            .filter_map(|alias| row.get(*alias).and_then(Value::as_str))
            .map(str::trim)
            .find(|label| !label.is_empty())
            .ok_or_else(|| {
                KpiError::Validation(format!(
                    "Row has no period label (expected one of {})",
                    LABEL_ALIASES.join(", ")
                ))
            })?;

        let metrics = row
            .iter()
            .filter(|(name, _)| !LABEL_ALIASES.contains(&name.as_str()))
            .filter_map(|(name, value)| numeric(value).map(|n| (name.clone(), n)))
            .collect();

        Ok(Self::new(label, metrics))
    }
}

/// A validated upstream response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiResponse {
    /// Row count reported upstream (or the accepted row count when absent).
    pub count: u64,
    /// Aggregate figures from the `data` object.
    pub totals: Metrics,
    /// Accepted `dataList` rows.
    pub records: Vec<RawPeriodRecord>,
    /// Number of `dataList` rows rejected by schema validation.
    pub rejected: usize,
}

impl KpiResponse {
    /// Validates a decoded upstream body of the shape
    /// `{ count, data: {..numbers..}, dataList: [..rows..] }`.
    ///
    /// Missing `data` or `dataList` are treated as empty. A body that is not an
    /// object, or whose `data`/`dataList` have the wrong JSON type, is a
    /// [`KpiError::Parse`].
    pub fn from_json(body: &Value) -> Result<Self> {
        let Value::Object(body) = body else {
            return Err(KpiError::Parse(format!(
                "Expected a JSON object, got {}",
                json_kind(body)
            )));
        };

        let totals = match body.get("data") {
            None | Some(Value::Null) => Metrics::new(),
            Some(Value::Object(data)) => numeric_fields(data),
            Some(other) => {
                return Err(KpiError::Parse(format!(
                    "Expected `data` to be an object, got {}",
                    json_kind(other)
                )));
            }
        };

        let rows: &[Value] = match body.get("dataList") {
            None | Some(Value::Null) => &[],
            Some(Value::Array(rows)) => rows,
            Some(other) => {
                return Err(KpiError::Parse(format!(
                    "Expected `dataList` to be an array, got {}",
                    json_kind(other)
                )));
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = 0usize;
        for row in rows {
            match RawPeriodRecord::from_json(row) {
                Ok(record) => records.push(record),
                Err(_) => rejected += 1,
            }
        }

        let count = body
            .get("count")
            .and_then(numeric)
            .filter(|n| *n >= 0.0)
            .map_or(records.len() as u64, |n| n as u64);

        Ok(Self {
            count,
            totals,
            records,
            rejected,
        })
    }

    /// Resolves a KPI figure: the `data` total, else the sum over rows, else `None`.
    #[must_use]
    pub fn metric(&self, key: &str) -> Option<f64> {
        if let Some(total) = self.totals.get(key) {
            return Some(*total);
        }
        let mut values = self.records.iter().filter_map(|r| r.metrics.get(key)).peekable();
        values.peek()?;
        Some(values.sum())
    }

    /// Returns true when the response carries no figures at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty() && self.records.is_empty()
    }
}

/// A formatted KPI ready for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiViewModel {
    /// Metric key the figure was read from.
    pub key: String,
    /// Display title, e.g. `Total Revenue`.
    pub title: String,
    /// Formatted current value.
    pub value: String,
    /// Formatted baseline value, present only in comparison mode with baseline data.
    pub comparison_value: Option<String>,
    /// Percentage change against the baseline, `0` without one.
    pub change: f64,
    /// Human label such as `+12.5% vs Nov 2025`, empty without a baseline.
    pub change_label: String,
}

fn numeric(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn numeric_fields(map: &Map<String, Value>) -> Metrics {
    map.iter()
        .filter_map(|(name, value)| numeric(value).map(|n| (name.clone(), n)))
        .collect()
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_year_month_range() {
        let dec = YearMonth::new(2025, 12).unwrap();
        assert_eq!(dec.month_start_utc().to_rfc3339(), "2025-12-01T00:00:00+00:00");
        assert_eq!(
            dec.month_end_utc().timestamp_millis(),
            YearMonth::new(2026, 1).unwrap().month_start_utc().timestamp_millis() - 1
        );
        assert_eq!(dec.label(), "Dec 2025");
        assert_eq!(dec.compare_key(), "2025-12");
    }

    #[test]
    fn test_february_leap_year_end() {
        let feb = YearMonth::new(2024, 2).unwrap();
        let end = feb.month_end_utc();
        assert_eq!(end.day(), 29);
        assert_eq!(end.timestamp_millis() % 1000, 999);
    }

    #[test]
    fn test_year_month_parse() {
        let month: YearMonth = "2025-03".parse().unwrap();
        assert_eq!((month.year(), month.month()), (2025, 3));
        assert!("2025-13".parse::<YearMonth>().is_err());
        assert!("March".parse::<YearMonth>().is_err());

        let json: YearMonth = serde_json::from_value(json!("2024-11")).unwrap();
        assert_eq!(json.month_index(), 10);
    }

    #[test]
    fn test_requests_from_filters() {
        let filters = KpiFilters::new(YearMonth::new(2025, 12).unwrap())
            .with_compare_month(YearMonth::new(2025, 11).unwrap())
            .with_dimension("clinicId", "c-17");

        let primary = KpiRequest::primary(&filters);
        assert!(primary.is_compare_month);
        assert_eq!(primary.compare_month.map(|m| m.compare_key()), Some("2025-11".into()));

        let baseline = KpiRequest::baseline(&filters).unwrap();
        assert!(!baseline.is_compare_month);
        assert!(baseline.end_ms < primary.start_ms);
        assert_eq!(baseline.dimensions.get("clinicId").map(String::as_str), Some("c-17"));

        let year = KpiRequest::year(&filters);
        assert_eq!(
            year.start_ms,
            YearMonth::new(2025, 1).unwrap().month_start_utc().timestamp_millis()
        );
        assert_eq!(year.end_ms, primary.end_ms);
    }

    #[test]
    fn test_record_label_aliases() {
        let row = json!({ "period": "Feb 2025", "revenue": 200, "visits": "42" });
        let record = RawPeriodRecord::from_json(&row).unwrap();
        assert_eq!(record.label, "Feb 2025");
        assert_eq!(record.metrics.get("revenue"), Some(&200.0));
        assert_eq!(record.metrics.get("visits"), Some(&42.0));

        // `month` outranks `name`, and empty labels are skipped.
        let row = json!({ "month": "  ", "name": "Mar", "label": "Jan", "revenue": 1 });
        assert_eq!(RawPeriodRecord::from_json(&row).unwrap().label, "Jan");
    }

    #[test]
    fn test_record_rejects_unrecognized_shapes() {
        assert!(RawPeriodRecord::from_json(&json!([1, 2])).is_err());
        assert!(RawPeriodRecord::from_json(&json!({ "revenue": 5 })).is_err());
        assert!(RawPeriodRecord::from_json(&json!({ "month": 12 })).is_err());
    }

    #[test]
    fn test_response_validation() {
        let body = json!({
            "count": 3,
            "data": { "revenue": 450, "note": "ignored" },
            "dataList": [
                { "month": "Jan 2025", "revenue": 100 },
                "garbage",
                { "label": "Feb 2025", "revenue": 200, "expenses": 50 }
            ]
        });
        let response = KpiResponse::from_json(&body).unwrap();
        assert_eq!(response.count, 3);
        assert_eq!(response.records.len(), 2);
        assert_eq!(response.rejected, 1);
        assert_eq!(response.metric("revenue"), Some(450.0));
        assert_eq!(response.metric("expenses"), Some(50.0));
        assert_eq!(response.metric("visits"), None);
    }

    #[test]
    fn test_response_wrong_types_are_parse_errors() {
        assert!(KpiResponse::from_json(&json!("oops")).unwrap_err().is_parse());
        assert!(KpiResponse::from_json(&json!({ "data": [] })).unwrap_err().is_parse());
        assert!(
            KpiResponse::from_json(&json!({ "dataList": {} }))
                .unwrap_err()
                .is_parse()
        );
        let empty = KpiResponse::from_json(&json!({})).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.count, 0);
    }
}
