//! Freshness cache.
//!
//! Routes every outgoing request through a per-route caching policy,
//! keeps the persistent store populated opportunistically, and serves
//! stale-but-usable snapshots when the network is gone. Policy
//! decisions live in [`policy`]; persistence lives in [`store`].

mod policy;
mod store;

pub use policy::{
    api_max_age, asset_kind, cache_key, classify, fallback_body, is_static_asset,
    offline_error_body, should_cache, static_content_type, AssetKind, RoutePolicy,
    CACHE_GENERATION, CRITICAL_ASSETS,
};
pub use store::{CacheEntry, CacheStore, StoreError};

use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

use crate::model::PushMessage;

/// Fixed background-sync registration tag for deferred sensor refresh.
pub const SYNC_TAG: &str = "sync-sensor-data";

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
    /// Live network response.
    Network,
    /// Persisted snapshot within its staleness budget.
    Cache,
    /// Synthesized typed fallback for an uncached static asset.
    Fallback,
    /// Structured offline error payload.
    OfflineError,
}

/// How the network failed, when it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    Timeout,
    Disconnected,
}

/// A response produced by the cache router.
#[derive(Debug, Clone)]
pub struct Served {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
    pub etag: Option<String>,
    pub source: ServeSource,
    /// Set whenever the network could not be used.
    pub failure: Option<NetworkFailure>,
}

/// A request about to be routed.
#[derive(Debug, Clone, Copy)]
pub struct CacheRequest<'a> {
    pub path: &'a str,
    pub query: Option<&'a str>,
    /// Whether the caller can render an HTML fallback.
    pub accepts_html: bool,
    /// Validator token for conditional API fetches.
    pub validator: Option<&'a str>,
}

impl<'a> CacheRequest<'a> {
    pub fn get(path: &'a str) -> Self {
        Self {
            path,
            query: None,
            accepts_html: false,
            validator: None,
        }
    }
}

/// Install failure: precaching the critical assets is all-or-nothing.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("failed to precache {path}: {reason}")]
    Precache { path: String, reason: String },
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid base URL: {0}")]
    BaseUrl(String),
    #[error("HTTP client error: {0}")]
    Client(String),
}

struct NetworkResponse {
    status: u16,
    etag: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Request router applying per-route cache policy over a persistent
/// store and one HTTP client.
#[derive(Clone)]
pub struct FreshnessCache {
    client: reqwest::Client,
    store: CacheStore,
    base_url: String,
    origin: String,
    generation: &'static str,
}

impl FreshnessCache {
    /// Build a cache router for `base_url` over `store`. All network
    /// calls carry `timeout` as their deadline.
    pub fn new(base_url: &str, store: CacheStore, timeout: Duration) -> Result<Self, CacheError> {
        let url = reqwest::Url::parse(base_url).map_err(|e| CacheError::BaseUrl(e.to_string()))?;
        let origin = url.origin().ascii_serialization();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::Client(e.to_string()))?;

        Ok(Self {
            client,
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            origin,
            generation: CACHE_GENERATION,
        })
    }

    /// Precache the critical assets into the current generation.
    ///
    /// All responses are collected before anything is written, so a
    /// failed asset leaves the store untouched.
    pub async fn install(&self) -> Result<usize, InstallError> {
        let mut entries = Vec::with_capacity(CRITICAL_ASSETS.len());

        for path in CRITICAL_ASSETS {
            let response = self
                .fetch_network(&CacheRequest::get(path))
                .await
                .map_err(|failure| InstallError::Precache {
                    path: path.to_string(),
                    reason: format!("{:?}", failure),
                })?;

            if response.status != 200 {
                return Err(InstallError::Precache {
                    path: path.to_string(),
                    reason: format!("status {}", response.status),
                });
            }

            let content_type = response
                .content_type
                .unwrap_or_else(|| static_content_type(path));
            entries.push((
                cache_key(&self.origin, path, None),
                response.body,
                content_type,
            ));
        }

        self.store.put_batch(self.generation, &entries, Utc::now())?;
        tracing::info!("Cache install complete: {} critical assets", entries.len());
        Ok(entries.len())
    }

    /// Drop every generation except the current one. Takes effect
    /// immediately for all subsequent requests.
    pub fn activate(&self) -> Result<usize, StoreError> {
        let removed = self.store.delete_generations_except(self.generation)?;
        if removed > 0 {
            tracing::info!("Cache activate: removed {} stale entries", removed);
        }
        Ok(removed)
    }

    /// The persistent store behind this router.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Origin used for cache keys.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Route one request through its cache policy.
    pub async fn handle(&self, req: CacheRequest<'_>) -> Served {
        match classify(req.path) {
            RoutePolicy::NetworkFirst { max_age } => self.network_first(&req, max_age).await,
            RoutePolicy::CacheFirst => self.cache_first(&req).await,
            RoutePolicy::CacheOrFetch => self.cache_or_fetch(&req).await,
        }
    }

    /// Network-first with time-boxed cached fallback, for dynamic data.
    async fn network_first(&self, req: &CacheRequest<'_>, max_age: Duration) -> Served {
        let key = cache_key(&self.origin, req.path, req.query);

        match self.fetch_network(req).await {
            Ok(response) => {
                if response.status == 200 {
                    let content_type = response
                        .content_type
                        .clone()
                        .unwrap_or_else(|| "application/json".to_string());
                    self.persist(&key, response.body.clone(), content_type);
                }
                served_from_network(response)
            }
            Err(failure) => {
                let entry = self.lookup(&key);
                serve_api_fallback(entry, max_age, failure)
            }
        }
    }

    /// Cache-first for static assets.
    async fn cache_first(&self, req: &CacheRequest<'_>) -> Served {
        let key = cache_key(&self.origin, req.path, req.query);

        if let Some(entry) = self.lookup(&key) {
            return served_from_entry(entry, None);
        }

        match self.fetch_network(req).await {
            Ok(response) => {
                if response.status == 200 {
                    let content_type = response
                        .content_type
                        .clone()
                        .unwrap_or_else(|| static_content_type(req.path));
                    self.persist(&key, response.body.clone(), content_type);
                }
                served_from_network(response)
            }
            Err(failure) => {
                let (body, content_type) = fallback_body(asset_kind(req.path));
                Served {
                    status: 200,
                    body,
                    content_type: content_type.to_string(),
                    etag: None,
                    source: ServeSource::Fallback,
                    failure: Some(failure),
                }
            }
        }
    }

    /// Generic cache-or-fetch for everything else.
    async fn cache_or_fetch(&self, req: &CacheRequest<'_>) -> Served {
        let key = cache_key(&self.origin, req.path, req.query);

        if let Some(entry) = self.lookup(&key) {
            return served_from_entry(entry, None);
        }

        match self.fetch_network(req).await {
            Ok(response) => {
                if should_cache(
                    true,
                    response.status == 200,
                    response.content_type.as_deref(),
                    req.path,
                ) {
                    let content_type = response
                        .content_type
                        .clone()
                        .unwrap_or_else(|| static_content_type(req.path));
                    self.persist(&key, response.body.clone(), content_type);
                }
                served_from_network(response)
            }
            Err(failure) => {
                if req.accepts_html {
                    let root_key = cache_key(&self.origin, "/", None);
                    if let Some(entry) = self.lookup(&root_key) {
                        return served_from_entry(entry, Some(failure));
                    }
                }

                Served {
                    status: 200,
                    body: offline_error_body("Network error", Utc::now().timestamp_millis()),
                    content_type: "application/json".to_string(),
                    etag: None,
                    source: ServeSource::OfflineError,
                    failure: Some(failure),
                }
            }
        }
    }

    async fn fetch_network(&self, req: &CacheRequest<'_>) -> Result<NetworkResponse, NetworkFailure> {
        let url = match req.query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, req.path, q),
            _ => format!("{}{}", self.base_url, req.path),
        };

        let mut builder = self.client.get(&url);
        if let Some(validator) = req.validator {
            builder = builder.header(reqwest::header::IF_NONE_MATCH, validator);
        }

        let response = builder.send().await.map_err(classify_network_error)?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(classify_network_error)?
            .to_vec();

        Ok(NetworkResponse {
            status,
            etag,
            content_type,
            body,
        })
    }

    fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match self.store.get(self.generation, key) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Persist without blocking the response path.
    fn persist(&self, key: &str, payload: Vec<u8>, content_type: String) {
        let store = self.store.clone();
        let generation = self.generation;
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.put(generation, &key, &payload, &content_type, Utc::now()) {
                tracing::error!("Cache write failed for {}: {}", key, e);
            }
        });
    }
}

fn classify_network_error(e: reqwest::Error) -> NetworkFailure {
    if e.is_timeout() {
        NetworkFailure::Timeout
    } else {
        NetworkFailure::Disconnected
    }
}

fn served_from_network(response: NetworkResponse) -> Served {
    Served {
        status: response.status,
        body: response.body,
        content_type: response
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        etag: response.etag,
        source: ServeSource::Network,
        failure: None,
    }
}

fn served_from_entry(entry: CacheEntry, failure: Option<NetworkFailure>) -> Served {
    Served {
        status: 200,
        body: entry.payload,
        content_type: entry.content_type,
        etag: None,
        source: ServeSource::Cache,
        failure,
    }
}

/// Pure fallback decision for a failed dynamic-data fetch: a fresh
/// snapshot is served byte-identical; a stale or missing one becomes
/// the structured offline error.
fn serve_api_fallback(
    entry: Option<CacheEntry>,
    max_age: Duration,
    failure: NetworkFailure,
) -> Served {
    let now = Utc::now();

    if let Some(entry) = entry {
        if entry.is_fresh(max_age, now) {
            return served_from_entry(entry, Some(failure));
        }
    }

    Served {
        status: 200,
        body: offline_error_body("You are offline", now.timestamp_millis()),
        content_type: "application/json".to_string(),
        etag: None,
        source: ServeSource::OfflineError,
        failure: Some(failure),
    }
}

/// True when a background-sync wake-up should trigger a client refresh.
pub fn sync_requests_refresh(tag: &str) -> bool {
    tag == SYNC_TAG
}

/// User notification derived from a push payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    /// Click target; an existing window at this URL is focused instead
    /// of opening a new one.
    pub url: String,
}

/// Decode a push payload into a notification. Malformed payloads yield
/// `None` and are dropped by the caller.
pub fn notification_for_push(payload: &[u8]) -> Option<Notification> {
    let message: PushMessage = serde_json::from_slice(payload).ok()?;
    Some(Notification {
        title: "Plantomio Alert".to_string(),
        body: message
            .message
            .unwrap_or_else(|| "New update from Plantomio".to_string()),
        icon: "/static/images/icon-192.png".to_string(),
        url: message.url.unwrap_or_else(|| "/".to_string()),
    })
}
