//! Data fetcher.
//!
//! Owns the sensor snapshot and the historical series store. Latest
//! readings are fetched conditionally with a validator token; history
//! is fetched per metric and replaced wholesale; externally-pushed
//! payloads take the same apply path without touching the network. All
//! requests go through the freshness cache router.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cache::{CacheRequest, FreshnessCache, NetworkFailure, ServeSource, Served};
use crate::model::{LatestPayload, Metric, SensorSnapshot, SeriesPoint, SystemInfo, TimeSeriesStore};

/// Network operation error types.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("server error: status {0}")]
    Server(u16),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Connectivity indicator observable by the presenter. Every fetch
/// outcome maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityStatus {
    /// Live data from the network.
    #[default]
    Live,
    /// Serving a cached snapshot while the network is down.
    CachedFallback,
    /// The last request exceeded its deadline.
    SlowConnection,
    /// The server answered with a non-success status.
    ConnectionError,
    /// No network and no usable cache.
    Offline,
}

/// Result of a latest-readings refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Snapshot replaced; `previous` is the superseded snapshot so the
    /// caller can diff for significant changes.
    Updated { previous: SensorSnapshot },
    /// Validator unchanged; prior snapshot remains authoritative.
    NotModified,
}

#[derive(Debug, Default)]
struct FetcherState {
    snapshot: SensorSnapshot,
    series: TimeSeriesStore,
    system: Option<SystemInfo>,
    validator: Option<String>,
    fetched_at: Option<DateTime<Utc>>,
    connectivity: ConnectivityStatus,
}

/// Fetches and owns all client-side sensor data.
///
/// State is replaced atomically under one lock; concurrent refreshes
/// cannot interleave partial updates, and the last completed response
/// wins.
#[derive(Clone)]
pub struct DataFetcher {
    cache: FreshnessCache,
    state: Arc<RwLock<FetcherState>>,
    timeout: Duration,
}

impl DataFetcher {
    pub fn new(cache: FreshnessCache, timeout: Duration) -> Self {
        Self {
            cache,
            state: Arc::new(RwLock::new(FetcherState::default())),
            timeout,
        }
    }

    /// Fetch the newest reading set.
    ///
    /// Attaches the stored validator unless `force` is set; a
    /// not-modified response is success-with-no-change. The request is
    /// bounded by the configured timeout and a timeout is reported
    /// distinctly from a connectivity failure.
    pub async fn refresh_latest(&self, force: bool) -> Result<RefreshOutcome, FetchError> {
        let validator = if force {
            None
        } else {
            self.state.read().await.validator.clone()
        };

        let req = CacheRequest {
            path: "/api/latest",
            query: None,
            accepts_html: false,
            validator: validator.as_deref(),
        };
        let served = self.cache.handle(req).await;
        self.apply_served_latest(served).await
    }

    /// Treat an externally-pushed payload as a successful refresh,
    /// bypassing the network.
    pub async fn apply_pushed_data(
        &self,
        payload: LatestPayload,
    ) -> Result<RefreshOutcome, FetchError> {
        if !payload.is_data() {
            return Err(FetchError::Malformed("error envelope".to_string()));
        }

        let mut state = self.state.write().await;
        let previous = std::mem::replace(
            &mut state.snapshot,
            SensorSnapshot::from_payload(&payload),
        );
        state.fetched_at = Some(Utc::now());
        state.connectivity = ConnectivityStatus::Live;
        Ok(RefreshOutcome::Updated { previous })
    }

    /// Fetch the historical series for one metric, replacing its store
    /// entry wholesale on success. Returns the point count.
    pub async fn fetch_series(&self, metric: Metric) -> Result<usize, FetchError> {
        let path = format!("/data/{}", metric.as_str());
        let served = self.cache.handle(CacheRequest::get(&path)).await;
        self.apply_served_series(metric, served).await
    }

    /// Fetch every metric's series concurrently, joining all requests
    /// before returning. Failed metrics are logged and keep their prior
    /// data.
    pub async fn refresh_all_series(&self) -> Vec<(Metric, Result<usize, FetchError>)> {
        let fetches = Metric::ALL.map(|metric| async move {
            let result = self.fetch_series(metric).await;
            if let Err(ref e) = result {
                tracing::warn!("Series fetch failed for {}: {}", metric, e);
            }
            (metric, result)
        });

        join_all(fetches).await
    }

    /// Fetch host resource utilization.
    pub async fn fetch_system_info(&self) -> Result<SystemInfo, FetchError> {
        let served = self.cache.handle(CacheRequest::get("/api/system/info")).await;
        let body = self.expect_body(served).await?;

        let info: SystemInfo = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        let mut state = self.state.write().await;
        state.system = Some(info.clone());
        Ok(info)
    }

    // --- Accessors ---

    pub async fn snapshot(&self) -> SensorSnapshot {
        self.state.read().await.snapshot.clone()
    }

    pub async fn series(&self, metric: Metric) -> Option<Vec<SeriesPoint>> {
        self.state.read().await.series.get(metric).map(<[_]>::to_vec)
    }

    pub async fn system_info(&self) -> Option<SystemInfo> {
        self.state.read().await.system.clone()
    }

    pub async fn connectivity(&self) -> ConnectivityStatus {
        self.state.read().await.connectivity
    }

    pub async fn validator(&self) -> Option<String> {
        self.state.read().await.validator.clone()
    }

    pub async fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.fetched_at
    }

    // --- Apply paths ---

    async fn apply_served_latest(&self, served: Served) -> Result<RefreshOutcome, FetchError> {
        match served.source {
            ServeSource::Network => {
                if served.status == 304 {
                    let mut state = self.state.write().await;
                    state.connectivity = ConnectivityStatus::Live;
                    return Ok(RefreshOutcome::NotModified);
                }

                if !(200..300).contains(&served.status) {
                    let mut state = self.state.write().await;
                    state.connectivity = ConnectivityStatus::ConnectionError;
                    return Err(FetchError::Server(served.status));
                }

                let payload = parse_latest(&served.body)?;

                let mut state = self.state.write().await;
                let previous = std::mem::replace(
                    &mut state.snapshot,
                    SensorSnapshot::from_payload(&payload),
                );
                if let Some(etag) = served.etag {
                    state.validator = Some(etag);
                }
                state.fetched_at = Some(Utc::now());
                state.connectivity = ConnectivityStatus::Live;
                Ok(RefreshOutcome::Updated { previous })
            }
            ServeSource::Cache => {
                // Stale-but-valid snapshot from the freshness cache.
                // Keep the validator: it belongs to the last live fetch.
                let payload = parse_latest(&served.body)?;

                let mut state = self.state.write().await;
                let previous = std::mem::replace(
                    &mut state.snapshot,
                    SensorSnapshot::from_payload(&payload),
                );
                state.fetched_at = Some(Utc::now());
                state.connectivity = ConnectivityStatus::CachedFallback;
                Ok(RefreshOutcome::Updated { previous })
            }
            ServeSource::Fallback | ServeSource::OfflineError => self.fail(served.failure).await,
        }
    }

    async fn apply_served_series(
        &self,
        metric: Metric,
        served: Served,
    ) -> Result<usize, FetchError> {
        match served.source {
            ServeSource::Network if !(200..300).contains(&served.status) => {
                let mut state = self.state.write().await;
                state.connectivity = ConnectivityStatus::ConnectionError;
                Err(FetchError::Server(served.status))
            }
            ServeSource::Network | ServeSource::Cache => {
                let points: Vec<SeriesPoint> = serde_json::from_slice(&served.body)
                    .map_err(|e| FetchError::Malformed(e.to_string()))?;

                let count = points.len();
                let mut state = self.state.write().await;
                state.series.replace(metric, points);
                if served.source == ServeSource::Cache {
                    state.connectivity = ConnectivityStatus::CachedFallback;
                }
                Ok(count)
            }
            ServeSource::Fallback | ServeSource::OfflineError => self.fail(served.failure).await,
        }
    }

    async fn expect_body(&self, served: Served) -> Result<Vec<u8>, FetchError> {
        match served.source {
            ServeSource::Network if !(200..300).contains(&served.status) => {
                let mut state = self.state.write().await;
                state.connectivity = ConnectivityStatus::ConnectionError;
                Err(FetchError::Server(served.status))
            }
            ServeSource::Network | ServeSource::Cache => Ok(served.body),
            ServeSource::Fallback | ServeSource::OfflineError => self.fail(served.failure).await,
        }
    }

    /// Record the failure's connectivity indicator and convert it into
    /// the matching error. Prior state is left untouched.
    async fn fail<T>(&self, failure: Option<NetworkFailure>) -> Result<T, FetchError> {
        let mut state = self.state.write().await;
        match failure {
            Some(NetworkFailure::Timeout) => {
                state.connectivity = ConnectivityStatus::SlowConnection;
                Err(FetchError::Timeout(self.timeout))
            }
            _ => {
                state.connectivity = ConnectivityStatus::Offline;
                Err(FetchError::Network("offline, no valid cache".to_string()))
            }
        }
    }
}

fn parse_latest(body: &[u8]) -> Result<LatestPayload, FetchError> {
    let payload: LatestPayload =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    if !payload.is_data() {
        return Err(FetchError::Malformed("error envelope".to_string()));
    }
    Ok(payload)
}
