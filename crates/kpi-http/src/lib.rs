#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! HTTP client for the upstream clinic KPI API.
//!
//! This crate implements the [`KpiSource`] trait from `kpi-core` over a single
//! `GET` endpoint:
//!
//! ```text
//! GET <endpoint>?startDate=<epochMs>&endDate=<epochMs>&isCompareMonth=<bool>
//!     &compareMonth=<yyyy-MM>&<dimension filters>&access_token=<token>
//! ```
//!
//! Any non-2xx status is reported as [`KpiError::Http`] whatever the body
//! looks like. Bodies are validated with [`KpiResponse::from_json`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use kpi_http::{ApiConfig, KpiApiClient};
//! use kpi_core::{KpiFilters, KpiRequest, KpiSource, YearMonth};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = KpiApiClient::new(ApiConfig::from_env()?);
//!     let filters = KpiFilters::new(YearMonth::new(2025, 12)?);
//!     let response = client.fetch(&KpiRequest::primary(&filters)).await?;
//!     println!("{} rows", response.count);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use kpi_core::{KpiError, KpiRequest, KpiResponse, KpiSource, Result};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/api/v1/kpi";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent for HTTP requests.
const USER_AGENT: &str = concat!("kpi-http/", env!("CARGO_PKG_VERSION"));

/// Environment variable holding the endpoint URL.
pub const ENV_ENDPOINT: &str = "KPI_API_ENDPOINT";
/// Environment variable holding the access token.
pub const ENV_TOKEN: &str = "KPI_API_TOKEN";
/// Environment variable holding the timeout in seconds.
pub const ENV_TIMEOUT: &str = "KPI_API_TIMEOUT_SECS";

/// Connection settings for the KPI API.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    /// Full URL of the KPI endpoint.
    pub endpoint: String,
    /// Token sent as the `access_token` query parameter.
    pub access_token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// User agent header.
    pub user_agent: String,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    /// Creates a config for the given endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Sets the access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Reads `KPI_API_ENDPOINT`, `KPI_API_TOKEN` and `KPI_API_TIMEOUT_SECS`.
    ///
    /// Unset variables keep their defaults; a malformed timeout is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            config.endpoint = endpoint.trim().to_string();
        }
        config.access_token = lookup(ENV_TOKEN).filter(|v| !v.trim().is_empty());
        if let Some(timeout) = lookup(ENV_TIMEOUT) {
            config.timeout_secs = timeout.trim().parse().map_err(|_| {
                KpiError::InvalidParameter(format!(
                    "{ENV_TIMEOUT} must be whole seconds, got {timeout:?}"
                ))
            })?;
        }
        Ok(config)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Client for the upstream KPI API.
#[derive(Clone)]
pub struct KpiApiClient {
    client: Client,
    config: ApiConfig,
}

impl fmt::Debug for KpiApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KpiApiClient")
            .field("config", &self.config)
            .finish()
    }
}

impl KpiApiClient {
    /// Create a new client, building an HTTP client with the configured timeout.
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using defaults");
                Client::new()
            });
        Self { client, config }
    }

    /// Create a new client with a custom HTTP client.
    #[must_use]
    pub const fn with_client(client: Client, config: ApiConfig) -> Self {
        Self { client, config }
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Builds the request URL.
    ///
    /// Parameters are emitted in a fixed order (dimensions sorted by name) so
    /// equal requests produce byte-identical URLs.
    fn url(&self, request: &KpiRequest) -> Result<Url> {
        let mut params: Vec<(String, String)> = vec![
            ("startDate".into(), request.start_ms.to_string()),
            ("endDate".into(), request.end_ms.to_string()),
            ("isCompareMonth".into(), request.is_compare_month.to_string()),
        ];
        if let Some(month) = request.compare_month {
            params.push(("compareMonth".into(), month.compare_key()));
        }
        params.extend(
            request
                .dimensions
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        if let Some(token) = &self.config.access_token {
            params.push(("access_token".into(), token.clone()));
        }

        Url::parse_with_params(&self.config.endpoint, &params).map_err(|e| {
            KpiError::InvalidParameter(format!("Invalid endpoint {:?}: {e}", self.config.endpoint))
        })
    }

    /// Make a GET request and return the body text of a 2xx response.
    async fn get(&self, url: Url) -> Result<String> {
        debug!(path = url.path(), "KPI request");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KpiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KpiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .text()
            .await
            .map_err(|e| KpiError::Network(e.to_string()))
    }
}

/// Decodes and validates a response body.
pub fn parse_body(text: &str) -> Result<KpiResponse> {
    let body: Value = serde_json::from_str(text)
        .map_err(|e| KpiError::Parse(format!("{e}: {}", snippet(text))))?;

    // Some gateways answer 200 with an error envelope instead of data.
    if let Value::Object(map) = &body {
        let has_payload = map.contains_key("data") || map.contains_key("dataList");
        if !has_payload && (map.contains_key("error") || map.contains_key("message")) {
            return Err(KpiError::Parse(format!("Error payload: {}", snippet(text))));
        }
    }

    KpiResponse::from_json(&body)
}

fn snippet(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    }
}

#[async_trait]
impl KpiSource for KpiApiClient {
    fn name(&self) -> &str {
        "KPI API"
    }

    fn request_url(&self, request: &KpiRequest) -> Result<String> {
        self.url(request).map(String::from)
    }

    #[instrument(skip(self, request), fields(start = request.start_ms, end = request.end_ms))]
    async fn fetch(&self, request: &KpiRequest) -> Result<KpiResponse> {
        let url = self.url(request)?;
        let text = self.get(url).await?;
        let response = parse_body(&text)?;
        if response.rejected > 0 {
            debug!(rejected = response.rejected, "Rejected malformed dataList rows");
        }
        Ok(response)
    }
}
