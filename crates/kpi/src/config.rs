//! Service configuration and KPI definitions.

use kpi_core::{KpiError, Result, ValueFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time-to-live for cached upstream responses.
pub const DEFAULT_CACHE_TTL_MS: u64 = 60_000;

/// One KPI card: which metric it shows, how, and what to show when offline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiDefinition {
    /// Metric key in the upstream `data` object and `dataList` rows.
    pub key: String,
    /// Display title.
    pub title: String,
    /// Value format.
    #[serde(default)]
    pub format: ValueFormat,
    /// Placeholder value used when the upstream is unavailable.
    #[serde(default)]
    pub fallback: f64,
}

impl KpiDefinition {
    /// Creates a definition.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        format: ValueFormat,
        fallback: f64,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            format,
            fallback,
        }
    }
}

/// The dashboard's standard KPI set with its documented fallback values.
///
/// | key               | title                 | fallback  |
/// |-------------------|-----------------------|-----------|
/// | `revenue`         | Total Revenue         | $125,000  |
/// | `expenses`        | Total Expenses        | $85,000   |
/// | `netProfit`       | Net Profit            | $40,000   |
/// | `patientVisits`   | Patient Visits        | 1,200     |
/// | `newPatients`     | New Patients          | 180       |
/// | `revenuePerVisit` | Avg Revenue per Visit | $104.17   |
#[must_use]
pub fn default_definitions() -> Vec<KpiDefinition> {
    vec![
        KpiDefinition::new("revenue", "Total Revenue", ValueFormat::Currency, 125_000.0),
        KpiDefinition::new("expenses", "Total Expenses", ValueFormat::Currency, 85_000.0),
        KpiDefinition::new("netProfit", "Net Profit", ValueFormat::Currency, 40_000.0),
        KpiDefinition::new("patientVisits", "Patient Visits", ValueFormat::Number, 1_200.0),
        KpiDefinition::new("newPatients", "New Patients", ValueFormat::Number, 180.0),
        KpiDefinition::new(
            "revenuePerVisit",
            "Avg Revenue per Visit",
            ValueFormat::Currency,
            104.17,
        ),
    ]
}

/// Settings for [`KpiDataService`](crate::KpiDataService).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// How long a cached upstream response stays valid, in milliseconds.
    pub cache_ttl_ms: u64,
    /// KPI cards to produce, in display order.
    pub definitions: Vec<KpiDefinition>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
            definitions: default_definitions(),
        }
    }
}

impl ServiceConfig {
    /// Parses a JSON config; omitted fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| KpiError::InvalidParameter(format!("Invalid service config: {e}")))?;
        if config.definitions.is_empty() {
            return Err(KpiError::InvalidParameter(
                "Service config must define at least one KPI".to_string(),
            ));
        }
        Ok(config)
    }

    /// Sets the cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Replaces the KPI definitions.
    #[must_use]
    pub fn with_definitions(mut self, definitions: Vec<KpiDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    /// Cache TTL as a [`Duration`].
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Every metric key the definitions refer to.
    pub fn metric_keys(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.key.as_str())
    }
}
