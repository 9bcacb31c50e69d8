//! KPI fetch cycles: cache-backed fetches, comparison, fallback and last-result-wins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace, warn};

use kpi_cache::{InMemoryRequestCache, fingerprint};
use kpi_core::{
    Bucket, ComparisonResult, Granularity, KpiFilters, KpiRequest, KpiResponse, KpiSource,
    KpiViewModel, PeriodRecord, RawPeriodRecord, RequestCache, Result, YearMonth, bucket_records,
    factory,
};

use crate::config::{KpiDefinition, ServiceConfig};

/// Where the current fetch cycle stands.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "camelCase")]
pub enum CycleState {
    /// No cycle has started.
    #[default]
    Idle,
    /// Date range and request are being resolved.
    Resolving,
    /// Primary request in flight.
    Fetching,
    /// Baseline request in flight.
    ComparisonFetching,
    /// Building view models.
    Transforming,
    /// Live figures applied.
    Ready,
    /// A fetch failed; fallback figures follow.
    Failed(String),
    /// Fallback figures applied.
    FallbackReady,
}

impl CycleState {
    /// True while a cycle is between `Resolving` and a terminal state.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(
            self,
            Self::Resolving | Self::Fetching | Self::ComparisonFetching | Self::Transforming
        )
    }

    /// True for `Ready` and `FallbackReady`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::FallbackReady)
    }
}

/// Result of one [`KpiDataService::fetch_kpi`] cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiOutcome {
    /// One entry per configured KPI, in definition order.
    pub view_models: Vec<KpiViewModel>,
    /// Always `false` on a returned outcome.
    pub loading: bool,
    /// Set when fallback figures are shown.
    pub error: Option<String>,
    /// Cycle token.
    pub generation: u64,
    /// True when `view_models` hold placeholder figures.
    pub fallback: bool,
    /// True when a newer cycle started before this one finished; such
    /// outcomes are never applied to [`KpiDataService::latest`].
    pub stale: bool,
}

/// Result of one [`KpiDataService::fetch_time_series`] call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesOutcome {
    /// Aggregated buckets, zero-filled on failure.
    pub buckets: Vec<Bucket>,
    /// Set when the buckets are a fallback.
    pub error: Option<String>,
    /// Call token.
    pub generation: u64,
    /// True when a newer time-series call started before this one finished.
    pub stale: bool,
}

#[derive(Debug, Default)]
struct Generations(AtomicU64);

impl Generations {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.0.load(Ordering::SeqCst) == generation
    }
}

#[derive(Debug, Default)]
struct SharedState {
    state: CycleState,
    latest: Option<KpiOutcome>,
}

/// Fetches, compares and formats clinic KPIs.
///
/// Every upstream call goes through a [`RequestCache`] keyed by the request
/// URL, so services sharing a cache also share in-flight requests. Each call
/// to [`fetch_kpi`](Self::fetch_kpi) starts a new cycle; a cycle's result is
/// only applied to [`state`](Self::state) and [`latest`](Self::latest) if no
/// newer cycle has started since.
///
/// # Example
///
/// ```rust,ignore
/// use kpi::{KpiDataService, KpiFilters, ServiceConfig, YearMonth};
///
/// let service = KpiDataService::with_api(api_config, ServiceConfig::default());
/// let filters = KpiFilters::new(YearMonth::new(2025, 12)?)
///     .with_compare_month(YearMonth::new(2025, 11)?);
/// let outcome = service.fetch_kpi(&filters).await;
/// for card in &outcome.view_models {
///     println!("{}: {} {}", card.title, card.value, card.change_label);
/// }
/// ```
pub struct KpiDataService {
    source: Arc<dyn KpiSource>,
    cache: Arc<dyn RequestCache<KpiResponse>>,
    config: ServiceConfig,
    kpi_cycles: Generations,
    series_calls: Generations,
    shared: RwLock<SharedState>,
}

impl std::fmt::Debug for KpiDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KpiDataService")
            .field("source", &self.source.name())
            .field("cache_stats", &self.cache.stats())
            .field("cache_ttl_ms", &self.config.cache_ttl_ms)
            .field(
                "definitions",
                &self.config.definitions.iter().map(|d| d.key.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl KpiDataService {
    /// Creates a service over `source`, sharing `cache` with anyone else holding it.
    #[must_use]
    pub fn new(
        source: Arc<dyn KpiSource>,
        cache: Arc<dyn RequestCache<KpiResponse>>,
        config: ServiceConfig,
    ) -> Self {
        debug!(source = source.name(), "Creating KPI data service");
        Self {
            source,
            cache,
            config,
            kpi_cycles: Generations::default(),
            series_calls: Generations::default(),
            shared: RwLock::new(SharedState::default()),
        }
    }

    /// Creates a service with its own in-memory cache.
    #[must_use]
    pub fn with_source(source: Arc<dyn KpiSource>, config: ServiceConfig) -> Self {
        Self::new(source, Arc::new(InMemoryRequestCache::<KpiResponse>::new()), config)
    }

    /// Creates a service backed by the upstream KPI API.
    #[cfg(feature = "http")]
    #[must_use]
    pub fn with_api(api: kpi_http::ApiConfig, config: ServiceConfig) -> Self {
        Self::with_source(Arc::new(kpi_http::KpiApiClient::new(api)), config)
    }

    /// The service's configuration.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The cache this service fetches through.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn RequestCache<KpiResponse>> {
        &self.cache
    }

    /// State of the most recent cycle.
    pub async fn state(&self) -> CycleState {
        self.shared.read().await.state.clone()
    }

    /// Outcome of the most recent cycle that was not superseded.
    pub async fn latest(&self) -> Option<KpiOutcome> {
        self.shared.read().await.latest.clone()
    }

    /// Runs one fetch cycle for `filters`.
    ///
    /// Never fails: on any network or parse error the configured fallback
    /// figures are returned together with the error message. In comparison
    /// mode the baseline month is fetched only after the primary month has
    /// resolved. A baseline month with no figures leaves the comparison fields
    /// empty.
    #[instrument(
        skip(self, filters),
        fields(month = %filters.month, compare = filters.is_comparison())
    )]
    pub async fn fetch_kpi(&self, filters: &KpiFilters) -> KpiOutcome {
        let generation = self.kpi_cycles.next();
        self.transition(generation, CycleState::Resolving).await;

        let mut outcome = match self.run_cycle(generation, filters).await {
            Ok(view_models) => KpiOutcome {
                view_models,
                loading: false,
                error: None,
                generation,
                fallback: false,
                stale: false,
            },
            Err(e) => {
                warn!(generation, error = %e, "KPI fetch failed, serving fallback figures");
                self.transition(generation, CycleState::Failed(e.to_string())).await;
                KpiOutcome {
                    view_models: fallback_view_models(&self.config.definitions),
                    loading: false,
                    error: Some(e.to_string()),
                    generation,
                    fallback: true,
                    stale: false,
                }
            }
        };

        outcome.stale = !self.apply(&outcome).await;
        outcome
    }

    /// Fetches the selected month's whole calendar year and aggregates it.
    ///
    /// On failure the buckets are built from a zeroed year so charts keep
    /// their shape, and the error is reported alongside.
    #[instrument(skip(self, filters), fields(month = %filters.month, granularity = %granularity))]
    pub async fn fetch_time_series(
        &self,
        filters: &KpiFilters,
        granularity: Granularity,
    ) -> TimeSeriesOutcome {
        let generation = self.series_calls.next();
        let year = filters.month.year();

        let (buckets, error) = match self.cached_fetch(&KpiRequest::year(filters)).await {
            Ok(response) => {
                if response.rejected > 0 {
                    debug!(rejected = response.rejected, "Skipped malformed time-series rows");
                }
                let records: Vec<PeriodRecord> =
                    response.records.iter().map(PeriodRecord::from_raw).collect();
                (bucket_records(&records, granularity, year), None)
            }
            Err(e) => {
                warn!(error = %e, "Time-series fetch failed, serving zeroed buckets");
                (
                    fallback_series(&self.config.definitions, granularity, year),
                    Some(e.to_string()),
                )
            }
        };

        let stale = !self.series_calls.is_current(generation);
        if stale {
            debug!(generation, "Time-series result superseded by a newer call");
        }
        TimeSeriesOutcome {
            buckets,
            error,
            generation,
            stale,
        }
    }

    async fn run_cycle(&self, generation: u64, filters: &KpiFilters) -> Result<Vec<KpiViewModel>> {
        let primary_request = KpiRequest::primary(filters);
        self.transition(generation, CycleState::Fetching).await;
        let primary = self.cached_fetch(&primary_request).await?;

        let baseline = match (KpiRequest::baseline(filters), filters.compare_month) {
            (Some(request), Some(month)) => {
                self.transition(generation, CycleState::ComparisonFetching).await;
                let response = self.cached_fetch(&request).await?;
                if response.is_empty() {
                    debug!(baseline = %month, "Baseline month has no figures, omitting comparison");
                    None
                } else {
                    Some((response, month))
                }
            }
            _ => None,
        };

        self.transition(generation, CycleState::Transforming).await;
        let baseline = baseline.as_ref().map(|(response, month)| (response, *month));
        Ok(build_view_models(&self.config.definitions, &primary, baseline))
    }

    async fn cached_fetch(&self, request: &KpiRequest) -> Result<KpiResponse> {
        let url = self.source.request_url(request)?;
        let key = fingerprint("GET", &url, None);
        let source = Arc::clone(&self.source);
        let request = request.clone();
        self.cache
            .get(
                &key,
                self.config.cache_ttl(),
                factory(move || async move { source.fetch(&request).await }),
            )
            .await
    }

    async fn transition(&self, generation: u64, next: CycleState) {
        let mut shared = self.shared.write().await;
        if self.kpi_cycles.is_current(generation) {
            trace!(generation, from = ?shared.state, to = ?next, "KPI cycle transition");
            shared.state = next;
        }
    }

    async fn apply(&self, outcome: &KpiOutcome) -> bool {
        let mut shared = self.shared.write().await;
        if !self.kpi_cycles.is_current(outcome.generation) {
            debug!(generation = outcome.generation, "Discarding superseded KPI cycle");
            return false;
        }
        shared.state = if outcome.fallback {
            CycleState::FallbackReady
        } else {
            CycleState::Ready
        };
        shared.latest = Some(outcome.clone());
        true
    }
}

/// Formats the primary figures and, where the baseline has the same metric, the comparison.
fn build_view_models(
    definitions: &[KpiDefinition],
    primary: &KpiResponse,
    baseline: Option<(&KpiResponse, YearMonth)>,
) -> Vec<KpiViewModel> {
    definitions
        .iter()
        .map(|definition| {
            let current = primary.metric(&definition.key).unwrap_or(0.0);
            let mut view_model = KpiViewModel {
                key: definition.key.clone(),
                title: definition.title.clone(),
                value: definition.format.format(current),
                comparison_value: None,
                change: 0.0,
                change_label: String::new(),
            };
            let previous = baseline.and_then(|(response, month)| {
                response.metric(&definition.key).map(|v| (v, month))
            });
            if let Some((previous, month)) = previous {
                let comparison = ComparisonResult::new(current, previous);
                if !comparison.is_finite() {
                    debug!(
                        key = %definition.key,
                        current,
                        previous,
                        "Dropping non-finite comparison"
                    );
                    return view_model;
                }
                view_model.comparison_value = Some(definition.format.format(previous));
                view_model.change = comparison.percent_change;
                view_model.change_label = comparison.label(&month.label());
            }
            view_model
        })
        .collect()
}

/// Placeholder cards built from each definition's fallback value.
#[must_use]
pub fn fallback_view_models(definitions: &[KpiDefinition]) -> Vec<KpiViewModel> {
    definitions
        .iter()
        .map(|definition| KpiViewModel {
            key: definition.key.clone(),
            title: definition.title.clone(),
            value: definition.format.format(definition.fallback),
            comparison_value: None,
            change: 0.0,
            change_label: String::new(),
        })
        .collect()
}

/// Zeroed buckets for `year` carrying every defined metric.
#[must_use]
pub fn fallback_series(
    definitions: &[KpiDefinition],
    granularity: Granularity,
    year: i32,
) -> Vec<Bucket> {
    let records: Vec<PeriodRecord> = (1..=12)
        .filter_map(|month| YearMonth::new(year, month).ok())
        .map(|month| {
            let metrics = definitions.iter().map(|d| (d.key.clone(), 0.0)).collect();
            PeriodRecord::from(RawPeriodRecord::new(month.label(), metrics))
        })
        .collect();
    bucket_records(&records, granularity, year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kpi_cache::{Clock, ManualClock};
    use kpi_core::KpiError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Default)]
    struct MockSource {
        responses: Mutex<HashMap<i64, Result<KpiResponse>>>,
        gates: Mutex<HashMap<i64, Arc<Notify>>>,
        calls: Mutex<Vec<KpiRequest>>,
    }

    impl MockSource {
        fn respond(&self, month: YearMonth, response: Result<KpiResponse>) {
            self.responses
                .lock()
                .unwrap()
                .insert(month.month_start_utc().timestamp_millis(), response);
        }

        fn respond_year(&self, year: i32, response: KpiResponse) {
            let start = YearMonth::new(year, 1).unwrap().year_start_utc().timestamp_millis();
            self.responses.lock().unwrap().insert(start, Ok(response));
        }

        fn gate(&self, month: YearMonth) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.gates
                .lock()
                .unwrap()
                .insert(month.month_start_utc().timestamp_millis(), Arc::clone(&gate));
            gate
        }

        fn calls(&self) -> Vec<KpiRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl KpiSource for MockSource {
        fn name(&self) -> &str {
            "mock"
        }

        fn request_url(&self, request: &KpiRequest) -> Result<String> {
            Ok(format!(
                "mock://kpi?start={}&end={}&compare={}&dims={:?}",
                request.start_ms, request.end_ms, request.is_compare_month, request.dimensions
            ))
        }

        async fn fetch(&self, request: &KpiRequest) -> Result<KpiResponse> {
            self.calls.lock().unwrap().push(request.clone());
            let gate = self.gates.lock().unwrap().get(&request.start_ms).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.responses
                .lock()
                .unwrap()
                .get(&request.start_ms)
                .cloned()
                .unwrap_or_else(|| Err(KpiError::Network("connection refused".to_string())))
        }
    }

    fn month(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    fn totals(pairs: &[(&str, f64)]) -> KpiResponse {
        KpiResponse {
            totals: pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            ..KpiResponse::default()
        }
    }

    fn service(source: &Arc<MockSource>) -> KpiDataService {
        KpiDataService::with_source(
            Arc::clone(source) as Arc<dyn KpiSource>,
            ServiceConfig::default(),
        )
    }

    fn card<'a>(outcome: &'a KpiOutcome, key: &str) -> &'a KpiViewModel {
        outcome.view_models.iter().find(|v| v.key == key).unwrap()
    }

    #[tokio::test]
    async fn test_ready_with_live_figures() {
        let source = Arc::new(MockSource::default());
        source.respond(
            month(2025, 12),
            Ok(totals(&[("revenue", 131_250.0), ("patientVisits", 1_260.0)])),
        );
        let service = service(&source);

        let outcome = service.fetch_kpi(&KpiFilters::new(month(2025, 12))).await;

        assert!(!outcome.fallback);
        assert!(!outcome.loading);
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.view_models.len(), 6);
        assert_eq!(card(&outcome, "revenue").value, "$131,250");
        assert_eq!(card(&outcome, "patientVisits").value, "1,260");
        assert_eq!(card(&outcome, "netProfit").value, "$0");
        assert_eq!(card(&outcome, "revenue").change_label, "");
        assert_eq!(service.state().await, CycleState::Ready);
        assert_eq!(service.latest().await, Some(outcome));
    }

    #[tokio::test]
    async fn test_value_falls_back_to_row_sum() {
        let source = Arc::new(MockSource::default());
        source.respond(
            month(2025, 12),
            Ok(KpiResponse {
                records: vec![
                    RawPeriodRecord::default().with_metric("newPatients", 40.0),
                    RawPeriodRecord::default().with_metric("newPatients", 35.0),
                ],
                ..KpiResponse::default()
            }),
        );

        let outcome = service(&source).fetch_kpi(&KpiFilters::new(month(2025, 12))).await;
        assert_eq!(card(&outcome, "newPatients").value, "75");
    }

    #[tokio::test]
    async fn test_network_failure_serves_fallback() {
        let source = Arc::new(MockSource::default());
        let service = service(&source);

        let outcome = service.fetch_kpi(&KpiFilters::new(month(2025, 12))).await;

        assert!(outcome.fallback);
        assert!(outcome.error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(card(&outcome, "revenue").value, "$125,000");
        assert_eq!(card(&outcome, "expenses").value, "$85,000");
        assert_eq!(card(&outcome, "netProfit").value, "$40,000");
        assert_eq!(card(&outcome, "patientVisits").value, "1,200");
        assert_eq!(card(&outcome, "revenuePerVisit").value, "$104.17");
        assert!(outcome.view_models.iter().all(|v| v.change == 0.0 && v.change_label.is_empty()));
        assert_eq!(service.state().await, CycleState::FallbackReady);
    }

    #[tokio::test]
    async fn test_parse_failure_serves_fallback() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Err(KpiError::Parse("expected value".to_string())));

        let outcome = service(&source).fetch_kpi(&KpiFilters::new(month(2025, 12))).await;
        assert!(outcome.fallback);
        assert_eq!(outcome.error.as_deref(), Some("Parse error: expected value"));
    }

    #[tokio::test]
    async fn test_comparison_labels() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 1_125.0), ("newPatients", 0.0)])));
        source.respond(month(2025, 11), Ok(totals(&[("revenue", 1_000.0), ("newPatients", 0.0)])));
        let filters = KpiFilters::new(month(2025, 12)).with_compare_month(month(2025, 11));

        let outcome = service(&source).fetch_kpi(&filters).await;

        let revenue = card(&outcome, "revenue");
        assert_eq!(revenue.change, 12.5);
        assert_eq!(revenue.change_label, "+12.5% vs Nov 2025");
        assert_eq!(revenue.comparison_value.as_deref(), Some("$1,000"));

        let new_patients = card(&outcome, "newPatients");
        assert_eq!(new_patients.change, 0.0);
        assert_eq!(new_patients.change_label, "+0.0% vs Nov 2025");

        let visits = card(&outcome, "patientVisits");
        assert_eq!(visits.comparison_value, None);
        assert_eq!(visits.change_label, "");
    }

    #[tokio::test]
    async fn test_non_finite_comparison_is_omitted() {
        let source = Arc::new(MockSource::default());
        let overflowing = |value: f64| KpiResponse {
            records: vec![
                RawPeriodRecord::default().with_metric("expenses", value),
                RawPeriodRecord::default().with_metric("expenses", value),
            ],
            ..totals(&[("revenue", 1e308), ("patientVisits", 110.0)])
        };
        source.respond(month(2025, 12), Ok(overflowing(1e308)));
        let mut baseline = overflowing(1e308);
        baseline.totals.insert("revenue".to_string(), 1e-308);
        baseline.totals.insert("patientVisits".to_string(), 100.0);
        source.respond(month(2025, 11), Ok(baseline));
        let filters = KpiFilters::new(month(2025, 12)).with_compare_month(month(2025, 11));

        let outcome = service(&source).fetch_kpi(&filters).await;

        assert!(!outcome.fallback);
        for key in ["revenue", "expenses"] {
            let view = card(&outcome, key);
            assert_eq!(view.change, 0.0, "{key}");
            assert_eq!(view.change_label, "", "{key}");
            assert_eq!(view.comparison_value, None, "{key}");
        }
        assert!(outcome.view_models.iter().all(|v| v.change.is_finite()));
        assert_eq!(card(&outcome, "patientVisits").change_label, "+10.0% vs Nov 2025");

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("\"change\":null"), "{json}");
        assert!(!json.contains("inf%"), "{json}");
    }

    #[tokio::test]
    async fn test_empty_baseline_is_not_fatal() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 500.0)])));
        source.respond(month(2025, 11), Ok(KpiResponse::default()));
        let filters = KpiFilters::new(month(2025, 12)).with_compare_month(month(2025, 11));
        let service = service(&source);

        let outcome = service.fetch_kpi(&filters).await;

        assert!(!outcome.fallback);
        assert_eq!(card(&outcome, "revenue").value, "$500");
        assert!(outcome.view_models.iter().all(|v| v.comparison_value.is_none()));
        assert!(outcome.view_models.iter().all(|v| v.change_label.is_empty()));
        assert_eq!(service.state().await, CycleState::Ready);
    }

    #[tokio::test]
    async fn test_baseline_fetch_error_serves_fallback() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 500.0)])));
        let filters = KpiFilters::new(month(2025, 12)).with_compare_month(month(2025, 11));

        let outcome = service(&source).fetch_kpi(&filters).await;
        assert!(outcome.fallback);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_baseline_issued_after_primary() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 2.0)])));
        source.respond(month(2025, 11), Ok(totals(&[("revenue", 1.0)])));
        let filters = KpiFilters::new(month(2025, 12))
            .with_compare_month(month(2025, 11))
            .with_dimension("clinicId", "c-17");

        service(&source).fetch_kpi(&filters).await;

        let calls = source.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], KpiRequest::primary(&filters));
        assert!(calls[0].is_compare_month);
        assert_eq!(Some(calls[1].clone()), KpiRequest::baseline(&filters));
        assert_eq!(calls[1].dimensions.get("clinicId").map(String::as_str), Some("c-17"));
    }

    #[tokio::test]
    async fn test_primary_failure_skips_baseline() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 11), Ok(totals(&[("revenue", 1.0)])));
        let filters = KpiFilters::new(month(2025, 12)).with_compare_month(month(2025, 11));

        service(&source).fetch_kpi(&filters).await;
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_services_sharing_a_cache_share_requests() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 10.0)])));
        let gate = source.gate(month(2025, 12));
        let cache: Arc<dyn RequestCache<KpiResponse>> =
            Arc::new(InMemoryRequestCache::<KpiResponse>::new());
        let dyn_source = Arc::clone(&source) as Arc<dyn KpiSource>;
        let first = KpiDataService::new(
            Arc::clone(&dyn_source),
            Arc::clone(&cache),
            ServiceConfig::default(),
        );
        let second = KpiDataService::new(dyn_source, Arc::clone(&cache), ServiceConfig::default());
        let filters = KpiFilters::new(month(2025, 12));

        let release = async {
            while cache.stats().hits < 1 {
                tokio::task::yield_now().await;
            }
            gate.notify_one();
        };
        let (a, b, ()) = tokio::join!(
            first.fetch_kpi(&filters),
            second.fetch_kpi(&filters),
            release
        );

        assert_eq!(source.calls().len(), 1);
        assert_eq!(a.view_models, b.view_models);
        assert_eq!(card(&a, "revenue").value, "$10");
    }

    #[tokio::test]
    async fn test_cached_response_reused_until_ttl() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 10.0)])));
        let clock = Arc::new(ManualClock::default());
        let clock_handle: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        let cache = Arc::new(InMemoryRequestCache::<KpiResponse>::with_clock(clock_handle));
        let service = KpiDataService::new(
            Arc::clone(&source) as Arc<dyn KpiSource>,
            cache,
            ServiceConfig::default().with_cache_ttl(Duration::from_secs(60)),
        );
        let filters = KpiFilters::new(month(2025, 12));

        service.fetch_kpi(&filters).await;
        clock.advance(Duration::from_secs(59));
        service.fetch_kpi(&filters).await;
        assert_eq!(source.calls().len(), 1);

        clock.advance(Duration::from_secs(1));
        service.fetch_kpi(&filters).await;
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_retried_next_cycle() {
        let source = Arc::new(MockSource::default());
        let service = service(&source);
        let filters = KpiFilters::new(month(2025, 12));

        assert!(service.fetch_kpi(&filters).await.fallback);
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 10.0)])));
        let outcome = service.fetch_kpi(&filters).await;

        assert!(!outcome.fallback);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_superseded_cycle_is_discarded() {
        let source = Arc::new(MockSource::default());
        source.respond(month(2025, 12), Ok(totals(&[("revenue", 999.0)])));
        source.respond(month(2025, 11), Ok(totals(&[("revenue", 100.0)])));
        let gate = source.gate(month(2025, 12));
        let service = service(&source);
        let slow = KpiFilters::new(month(2025, 12));
        let fast = KpiFilters::new(month(2025, 11));

        let (old, new) = tokio::join!(service.fetch_kpi(&slow), async {
            while source.calls().is_empty() {
                tokio::task::yield_now().await;
            }
            let outcome = service.fetch_kpi(&fast).await;
            gate.notify_one();
            outcome
        });

        assert!(old.stale);
        assert_eq!(card(&old, "revenue").value, "$999");
        assert!(!new.stale);
        assert!(new.generation > old.generation);

        let latest = service.latest().await.unwrap();
        assert_eq!(latest.generation, new.generation);
        assert_eq!(card(&latest, "revenue").value, "$100");
        assert_eq!(service.state().await, CycleState::Ready);
    }

    #[tokio::test]
    async fn test_quarterly_time_series() {
        let source = Arc::new(MockSource::default());
        source.respond_year(
            2025,
            KpiResponse {
                records: [("Jan 2025", 100.0), ("Feb 2025", 150.0), ("Mar 2025", 200.0)]
                    .into_iter()
                    .map(|(label, revenue)| {
                        RawPeriodRecord::new(label, Default::default())
                            .with_metric("revenue", revenue)
                    })
                    .collect(),
                ..KpiResponse::default()
            },
        );
        let filters = KpiFilters::new(month(2025, 6));

        let outcome = service(&source)
            .fetch_time_series(&filters, Granularity::Quarterly)
            .await;

        assert_eq!(outcome.error, None);
        assert!(!outcome.stale);
        let revenue: Vec<f64> = outcome.buckets.iter().map(|b| b.metric("revenue")).collect();
        assert_eq!(revenue, vec![450.0, 0.0, 0.0, 0.0]);
        assert_eq!(outcome.buckets[0].label, "Q1 (Jan-Mar)");
        assert_eq!(source.calls()[0], KpiRequest::year(&filters));
    }

    #[tokio::test]
    async fn test_time_series_failure_serves_zeroed_buckets() {
        let source = Arc::new(MockSource::default());
        let service = service(&source);
        let filters = KpiFilters::new(month(2025, 6));

        let monthly = service.fetch_time_series(&filters, Granularity::Monthly).await;
        assert!(monthly.error.is_some());
        assert_eq!(monthly.buckets.len(), 12);
        assert_eq!(monthly.buckets[0].label, "Jan");

        let yearly = service.fetch_time_series(&filters, Granularity::Yearly).await;
        assert_eq!(yearly.buckets.len(), 1);
        assert_eq!(yearly.buckets[0].label, "2025");
        assert_eq!(yearly.buckets[0].metrics.len(), 6);
        assert!(yearly.buckets[0].metrics.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cycle_state_flags() {
        assert!(CycleState::Fetching.is_loading());
        assert!(!CycleState::Idle.is_loading());
        assert!(CycleState::FallbackReady.is_terminal());
        assert!(!CycleState::Failed("x".to_string()).is_terminal());
    }
}
