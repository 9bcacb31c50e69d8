#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits, types and period engines for clinic KPI data.
//!
//! This crate provides the foundational pieces of the KPI service:
//!
//! - [`KpiSource`](provider::KpiSource) - The upstream API seam
//! - [`RequestCache`](cache::RequestCache) - Request de-duplication abstraction
//! - [`parse_month_label`](period::parse_month_label) - Period label normalization
//! - [`bucket_records`](bucket::bucket_records) - Monthly, quarterly and yearly aggregation
//! - [`percent_change`](comparison::percent_change) - Period-over-period comparison

/// Monthly, quarterly and yearly aggregation.
pub mod bucket;
/// Cache trait for de-duplicating upstream requests.
pub mod cache;
/// Period-over-period comparison.
pub mod comparison;
/// Error types for KPI operations.
pub mod error;
/// Display formatting for KPI values.
pub mod format;
/// Time granularity definitions.
pub mod frequency;
/// Month label normalization.
pub mod period;
/// Source trait for fetching KPI data.
pub mod provider;
/// Core data types (YearMonth, KpiRequest, KpiResponse, ...).
pub mod types;

// Re-export commonly used items at crate root
pub use bucket::{Bucket, PeriodRecord, QUARTER_LABELS, bucket_records};
pub use cache::{CacheStats, Factory, RequestCache, factory};
pub use comparison::{ComparisonResult, Trend, percent_change};
pub use error::{KpiError, Result};
pub use format::ValueFormat;
pub use frequency::Granularity;
pub use period::{MONTH_KEYS, NormalizedPeriod, parse_month_label};
pub use provider::KpiSource;
pub use types::{
    KpiFilters, KpiRequest, KpiResponse, KpiViewModel, LABEL_ALIASES, Metrics, RawPeriodRecord,
    YearMonth,
};
