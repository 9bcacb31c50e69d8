//! Monthly, quarterly and yearly aggregation of period records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::frequency::Granularity;
use crate::period::{NormalizedPeriod, parse_month_label};
use crate::types::{Metrics, RawPeriodRecord};

/// Quarter bucket labels, indexed by 0-based quarter.
pub const QUARTER_LABELS: [&str; 4] =
    ["Q1 (Jan-Mar)", "Q2 (Apr-Jun)", "Q3 (Jul-Sep)", "Q4 (Oct-Dec)"];

/// A record whose label has been normalized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    /// Label as received.
    pub label: String,
    /// Parsed month and year.
    pub period: NormalizedPeriod,
    /// Named metrics.
    pub metrics: Metrics,
}

impl PeriodRecord {
    /// Normalizes a raw record's label. Unparseable labels are kept with a
    /// best-effort month key so their figures still count.
    #[must_use]
    pub fn from_raw(raw: &RawPeriodRecord) -> Self {
        Self {
            label: raw.label.clone(),
            period: parse_month_label(&raw.label),
            metrics: raw.metrics.clone(),
        }
    }

    fn display_label(&self) -> &str {
        if self.period.month_key.is_empty() {
            &self.label
        } else {
            &self.period.month_key
        }
    }
}

impl From<RawPeriodRecord> for PeriodRecord {
    fn from(raw: RawPeriodRecord) -> Self {
        let period = parse_month_label(&raw.label);
        Self {
            label: raw.label,
            period,
            metrics: raw.metrics,
        }
    }
}

/// An aggregated group of records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Month key, quarter label, or year.
    pub label: String,
    /// Element-wise sums of the contributing records' metrics.
    pub metrics: Metrics,
}

impl Bucket {
    fn zeroed(label: impl Into<String>, keys: &BTreeSet<&str>) -> Self {
        Self {
            label: label.into(),
            metrics: keys.iter().map(|k| ((*k).to_string(), 0.0)).collect(),
        }
    }

    fn add(&mut self, metrics: &Metrics) {
        for (name, value) in metrics {
            *self.metrics.entry(name.clone()).or_insert(0.0) += value;
        }
    }

    /// Value of one metric, `0` when absent.
    #[must_use]
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }
}

/// Groups records into buckets of the given granularity for one year.
///
/// Records whose year is known and differs from `year` are dropped; records
/// with no year are kept. Every metric seen on any input record appears in
/// every bucket, at `0` where nothing contributed.
///
/// - `Monthly`: one bucket per kept record, labelled with its month key.
/// - `Quarterly`: the four [`QUARTER_LABELS`] buckets. Records whose month
///   cannot be resolved are left out of every quarter.
/// - `Yearly`: one bucket labelled with `year`.
#[must_use]
pub fn bucket_records(
    records: &[PeriodRecord],
    granularity: Granularity,
    year: i32,
) -> Vec<Bucket> {
    let keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.metrics.keys().map(String::as_str))
        .collect();

    let kept = records
        .iter()
        .filter(|r| r.period.year.is_none_or(|y| y == year));

    match granularity {
        Granularity::Monthly => kept
            .map(|record| {
                let mut bucket = Bucket::zeroed(record.display_label(), &keys);
                bucket.add(&record.metrics);
                bucket
            })
            .collect(),
        Granularity::Quarterly => {
            let mut quarters: Vec<Bucket> = QUARTER_LABELS
                .iter()
                .map(|label| Bucket::zeroed(*label, &keys))
                .collect();
            for record in kept {
                if let Some(month) = record.period.resolved_month_index() {
                    quarters[(month / 3) as usize].add(&record.metrics);
                }
            }
            quarters
        }
        Granularity::Yearly => {
            let mut bucket = Bucket::zeroed(year.to_string(), &keys);
            for record in kept {
                bucket.add(&record.metrics);
            }
            vec![bucket]
        }
    }
}

/// Sums one metric across buckets.
#[must_use]
pub fn total(buckets: &[Bucket], metric: &str) -> f64 {
    buckets.iter().map(|b| b.metric(metric)).sum()
}
