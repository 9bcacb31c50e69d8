#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Clinic KPI analytics.
//!
//! This crate re-exports the core types and engines and provides a
//! [`KpiDataService`] that turns dashboard filters into formatted KPI cards
//! and trend-chart buckets, falling back to documented placeholder figures
//! when the upstream is unavailable.
//!
//! # Features
//!
//! - `http` (default) - upstream KPI API client and [`KpiDataService::with_api`]

// Core types and traits
pub use kpi_core::*;

// Cache implementations
pub use kpi_cache::{
    Clock, InMemoryRequestCache, ManualClock, NoopRequestCache, SystemClock, fingerprint,
};

// Upstream client
#[cfg(feature = "http")]
pub use kpi_http::{ApiConfig, KpiApiClient};

mod config;
mod service;

pub use config::{DEFAULT_CACHE_TTL_MS, KpiDefinition, ServiceConfig, default_definitions};
pub use service::{
    CycleState, KpiDataService, KpiOutcome, TimeSeriesOutcome, fallback_series,
    fallback_view_models,
};
