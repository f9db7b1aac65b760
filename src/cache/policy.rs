//! Route policies for the freshness cache.
//!
//! Pure decision functions: classification, cache keys, staleness
//! budgets, cacheability, and degraded fallback bodies. No I/O here,
//! which keeps every policy testable in isolation.

use std::time::Duration;

/// Current cache generation. Activation deletes every other one.
pub const CACHE_GENERATION: &str = "plantomio-cache-v1";

/// Assets precached at install time. Install fails unless all of them
/// are fetched and stored.
pub const CRITICAL_ASSETS: [&str; 5] = [
    "/",
    "/static/css/styles.css",
    "/static/js/main.js",
    "/static/images/icon-192.png",
    "/static/manifest.json",
];

/// Extensions cached opportunistically as they are requested.
const CACHEABLE_EXTENSIONS: [&str; 8] = ["html", "css", "js", "json", "png", "jpg", "svg", "ico"];

/// Per-route staleness budgets for API data.
const API_MAX_AGES: [(&str, Duration); 3] = [
    ("/api/latest", Duration::from_secs(30)),
    ("/data/", Duration::from_secs(5 * 60)),
    ("/api/system/info", Duration::from_secs(60)),
];

const DEFAULT_API_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Caching strategy for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePolicy {
    /// Try the network; fall back to a time-boxed cached snapshot.
    NetworkFirst { max_age: Duration },
    /// Serve the cached copy immediately; fetch only on a miss.
    CacheFirst,
    /// Serve cached if present, else fetch and persist when cacheable.
    CacheOrFetch,
}

/// Pick the policy for a request path. Dynamic data endpoints win over
/// the static-asset pattern.
pub fn classify(path: &str) -> RoutePolicy {
    if path.starts_with("/api/") || path.starts_with("/data/") {
        RoutePolicy::NetworkFirst {
            max_age: api_max_age(path),
        }
    } else if is_static_asset(path) {
        RoutePolicy::CacheFirst
    } else {
        RoutePolicy::CacheOrFetch
    }
}

/// Staleness budget for an API route. Longest matching prefix wins.
pub fn api_max_age(path: &str) -> Duration {
    API_MAX_AGES
        .iter()
        .filter(|(prefix, _)| path.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, max_age)| *max_age)
        .unwrap_or(DEFAULT_API_MAX_AGE)
}

/// True when the path looks like a static asset, by extension or by the
/// static prefix.
pub fn is_static_asset(path: &str) -> bool {
    if path.starts_with("/static/") {
        return true;
    }
    match path.rsplit('.').next() {
        Some(ext) if ext != path => {
            let ext = ext.to_ascii_lowercase();
            CACHEABLE_EXTENSIONS.iter().any(|e| *e == ext)
        }
        _ => false,
    }
}

/// Cache key for a request. API routes key on origin + path so
/// query-string variations share one snapshot; everything else keeps
/// the query string.
pub fn cache_key(origin: &str, path: &str, query: Option<&str>) -> String {
    if path.starts_with("/api/") || path.starts_with("/data/") {
        return format!("{}{}", origin, path);
    }
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", origin, path, q),
        _ => format!("{}{}", origin, path),
    }
}

/// Content types the generic route is willing to persist.
pub fn is_cacheable_content_type(content_type: &str) -> bool {
    content_type.contains("text/html")
        || content_type.contains("text/css")
        || content_type.contains("application/javascript")
        || content_type.contains("image/")
        || content_type.contains("font/")
        || content_type.contains("application/json")
}

/// Whether the generic route should persist a response: successful GET
/// with an allowed content type, or a static-asset path.
pub fn should_cache(is_get: bool, status_ok: bool, content_type: Option<&str>, path: &str) -> bool {
    if !is_get || !status_ok {
        return false;
    }
    if let Some(ct) = content_type {
        if is_cacheable_content_type(ct) {
            return true;
        }
    }
    is_static_asset(path)
}

/// Content type for a static asset path.
pub fn static_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Kind of static asset, for typed offline fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Stylesheet,
    Script,
    Image,
    Other,
}

pub fn asset_kind(path: &str) -> AssetKind {
    match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("css") => AssetKind::Stylesheet,
        Some("js") => AssetKind::Script,
        Some("png") | Some("jpg") | Some("jpeg") | Some("gif") | Some("svg") => AssetKind::Image,
        _ => AssetKind::Other,
    }
}

/// Minimal typed fallback body for an unreachable, uncached asset.
/// Returns (body, content type).
pub fn fallback_body(kind: AssetKind) -> (Vec<u8>, &'static str) {
    match kind {
        AssetKind::Stylesheet => (b"/* offline fallback */".to_vec(), "text/css"),
        AssetKind::Script => (b"void 0;".to_vec(), "application/javascript"),
        AssetKind::Image => (Vec::new(), "application/octet-stream"),
        AssetKind::Other => (b"Offline".to_vec(), "text/plain"),
    }
}

/// Structured offline error payload: `{ error, offline: true, timestamp }`.
pub fn offline_error_body(message: &str, timestamp_ms: i64) -> Vec<u8> {
    serde_json::json!({
        "error": message,
        "offline": true,
        "timestamp": timestamp_ms,
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_api_routes_network_first() {
        assert_eq!(
            classify("/api/latest"),
            RoutePolicy::NetworkFirst { max_age: Duration::from_secs(30) }
        );
        assert_eq!(
            classify("/data/pH"),
            RoutePolicy::NetworkFirst { max_age: Duration::from_secs(300) }
        );
        assert_eq!(
            classify("/api/system/info"),
            RoutePolicy::NetworkFirst { max_age: Duration::from_secs(60) }
        );
        // Unlisted API route falls to the default budget.
        assert_eq!(
            classify("/api/unknown"),
            RoutePolicy::NetworkFirst { max_age: Duration::from_secs(300) }
        );
    }

    #[test]
    fn test_classify_static_and_generic() {
        assert_eq!(classify("/static/css/styles.css"), RoutePolicy::CacheFirst);
        assert_eq!(classify("/favicon.ico"), RoutePolicy::CacheFirst);
        assert_eq!(classify("/static/fonts/inter.woff2"), RoutePolicy::CacheFirst);
        assert_eq!(classify("/"), RoutePolicy::CacheOrFetch);
        assert_eq!(classify("/about"), RoutePolicy::CacheOrFetch);
    }

    #[test]
    fn test_api_cache_key_ignores_query() {
        let with_query = cache_key("http://host", "/api/latest", Some("ts=123"));
        let without = cache_key("http://host", "/api/latest", None);
        assert_eq!(with_query, without);
        assert_eq!(without, "http://host/api/latest");
    }

    #[test]
    fn test_non_api_cache_key_keeps_query() {
        let key = cache_key("http://host", "/page", Some("v=2"));
        assert_eq!(key, "http://host/page?v=2");
    }

    #[test]
    fn test_is_static_asset() {
        assert!(is_static_asset("/static/js/main.js"));
        assert!(is_static_asset("/logo.SVG"));
        assert!(is_static_asset("/index.html"));
        assert!(!is_static_asset("/api/latest"));
        assert!(!is_static_asset("/dashboard"));
    }

    #[test]
    fn test_should_cache_rules() {
        assert!(should_cache(true, true, Some("application/json"), "/misc"));
        assert!(should_cache(true, true, None, "/static/app.wasm"));
        assert!(!should_cache(false, true, Some("text/html"), "/page"));
        assert!(!should_cache(true, false, Some("text/html"), "/page"));
        assert!(!should_cache(true, true, Some("video/mp4"), "/clip"));
    }

    #[test]
    fn test_fallback_bodies_are_typed() {
        let (body, ct) = fallback_body(asset_kind("/static/css/styles.css"));
        assert_eq!(ct, "text/css");
        assert!(!body.is_empty());

        let (body, ct) = fallback_body(asset_kind("/static/js/main.js"));
        assert_eq!(ct, "application/javascript");
        assert!(!body.is_empty());

        let (body, _) = fallback_body(asset_kind("/static/images/icon-192.png"));
        assert!(body.is_empty());

        let (body, ct) = fallback_body(asset_kind("/manifest"));
        assert_eq!(ct, "text/plain");
        assert_eq!(body, b"Offline");
    }

    #[test]
    fn test_offline_error_shape() {
        let body = offline_error_body("You are offline", 1_700_000_000_000);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["offline"], true);
        assert_eq!(value["error"], "You are offline");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
    }
}
