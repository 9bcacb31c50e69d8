//! Source trait for fetching KPI data.
//!
//! [`KpiSource`] is the only network-aware seam in the workspace. The HTTP
//! client in `kpi-http` implements it; tests substitute in-memory doubles.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::Result,
    types::{KpiRequest, KpiResponse},
};

/// Upstream KPI API.
#[async_trait]
pub trait KpiSource: Send + Sync + Debug {
    /// Returns the name of this source (e.g. "KPI API").
    fn name(&self) -> &str;

    /// Returns the fully resolved URL for a request.
    ///
    /// Equal requests must yield equal URLs; the URL is the cache key.
    fn request_url(&self, request: &KpiRequest) -> Result<String>;

    /// Fetches and validates one response.
    async fn fetch(&self, request: &KpiRequest) -> Result<KpiResponse>;
}
