//! # Request Classification
//!
//! Static rules that decide how an intercepted request is served.
//!
//! ## Decision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Request Classification                             │
//! │                                                                         │
//! │   method != GET/HEAD ─────────────────► Mutation (sync queue on fail)  │
//! │   navigate / document ────────────────► NetworkFirst   → dynamic       │
//! │   style / script / worker ────────────► CacheFirst     → assets        │
//! │   image ──────────────────────────────► CacheFirst     → images        │
//! │   path starts with /api/ ─────────────► StaleWhileRevalidate → api     │
//! │   anything else ──────────────────────► NetworkOnly                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Classification never suspends: it is a pure function of the request.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::types::{url_path, FetchRequest, RequestDestination};

// =============================================================================
// Cache Kinds
// =============================================================================

/// The named cache stores the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum CacheKind {
    /// App shell seed set, populated at install.
    Static,
    /// Navigation documents.
    Dynamic,
    /// Style, script and worker resources.
    Assets,
    /// Images.
    Images,
    /// `/api/*` GET responses.
    Api,
}

impl CacheKind {
    pub const ALL: [CacheKind; 5] = [
        CacheKind::Static,
        CacheKind::Dynamic,
        CacheKind::Assets,
        CacheKind::Images,
        CacheKind::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Static => "static",
            CacheKind::Dynamic => "dynamic",
            CacheKind::Assets => "assets",
            CacheKind::Images => "images",
            CacheKind::Api => "api",
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CacheKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" | "shell" => Ok(CacheKind::Static),
            "dynamic" | "pages" => Ok(CacheKind::Dynamic),
            "assets" => Ok(CacheKind::Assets),
            "images" | "image" => Ok(CacheKind::Images),
            "api" => Ok(CacheKind::Api),
            other => Err(CoreError::UnknownCacheType(other.to_string())),
        }
    }
}

/// Versioned cache naming: `<namespace>-<kind>-<version>`.
///
/// ## Example
/// ```rust
/// use stockroom_core::routing::{CacheKind, CacheNames};
///
/// let names = CacheNames::new("stockroom", "v2");
/// assert_eq!(names.name(CacheKind::Api), "stockroom-api-v2");
/// assert!(names.is_stale("stockroom-api-v1"));
/// assert!(!names.is_stale("other-app-cache"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    namespace: String,
    version: String,
}

impl CacheNames {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        CacheNames {
            namespace: namespace.into(),
            version: version.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Full name of the current-version cache of `kind`.
    pub fn name(&self, kind: CacheKind) -> String {
        format!("{}-{}-{}", self.namespace, kind.as_str(), self.version)
    }

    /// Names of every current-version cache.
    pub fn current(&self) -> Vec<String> {
        CacheKind::ALL.iter().map(|kind| self.name(*kind)).collect()
    }

    /// True when `name` carries this namespace but is not a current cache.
    ///
    /// Caches outside the namespace are never stale: they belong to someone
    /// else.
    pub fn is_stale(&self, name: &str) -> bool {
        let prefix = format!("{}-", self.namespace);
        name.starts_with(&prefix) && !CacheKind::ALL.iter().any(|kind| self.name(*kind) == name)
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Try the network, fall back to the cache.
    NetworkFirst,
    /// Serve from cache, go to the network only on a miss.
    CacheFirst,
    /// Serve from cache immediately and refresh in the background.
    StaleWhileRevalidate,
    /// Straight to the network, nothing cached.
    NetworkOnly,
    /// Mutating request: straight to the network, queued on failure.
    Mutation,
}

/// The outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub strategy: Strategy,

    /// Cache the strategy reads from and writes to.
    pub cache: Option<CacheKind>,
}

impl Route {
    fn new(strategy: Strategy, cache: Option<CacheKind>) -> Self {
        Route { strategy, cache }
    }
}

/// Classifies an intercepted request.
///
/// ## Example
/// ```rust
/// use stockroom_core::routing::{classify, CacheKind, Strategy};
/// use stockroom_core::types::{FetchRequest, RequestSnapshot};
///
/// let route = classify(&FetchRequest::new(RequestSnapshot::get("/api/products")));
/// assert_eq!(route.strategy, Strategy::StaleWhileRevalidate);
/// assert_eq!(route.cache, Some(CacheKind::Api));
/// ```
pub fn classify(req: &FetchRequest) -> Route {
    if !req.request.is_read() {
        return Route::new(Strategy::Mutation, None);
    }

    if req.navigate || req.destination == RequestDestination::Document {
        return Route::new(Strategy::NetworkFirst, Some(CacheKind::Dynamic));
    }

    match req.destination {
        RequestDestination::Style | RequestDestination::Script | RequestDestination::Worker => {
            return Route::new(Strategy::CacheFirst, Some(CacheKind::Assets));
        }
        RequestDestination::Image => {
            return Route::new(Strategy::CacheFirst, Some(CacheKind::Images));
        }
        _ => {}
    }

    if req.request.path().starts_with("/api/") {
        return Route::new(Strategy::StaleWhileRevalidate, Some(CacheKind::Api));
    }

    Route::new(Strategy::NetworkOnly, None)
}

/// True for API resources that change often enough to get the short TTL.
pub fn is_high_mutation(url: &str) -> bool {
    let path = url_path(url);
    path.contains("/stock") || path.contains("/inventory")
}

// =============================================================================
// Sync Domains
// =============================================================================

/// Business domains that own a sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum SyncDomain {
    Sales,
    Stock,
    Purchase,
}

impl SyncDomain {
    pub const ALL: [SyncDomain; 3] = [SyncDomain::Sales, SyncDomain::Stock, SyncDomain::Purchase];

    /// Selects the queue for a failed mutation by URL substring.
    ///
    /// Returns `None` for mutations outside the three domains; those are
    /// reported as offline instead of being queued.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url_path(url);
        if path.contains("/sales") {
            Some(SyncDomain::Sales)
        } else if path.contains("/stock") || path.contains("/inventory") {
            Some(SyncDomain::Stock)
        } else if path.contains("/purchase") {
            Some(SyncDomain::Purchase)
        } else {
            None
        }
    }

    /// Parses a sync tag (`sales-sync`) or bare domain name (`sales`).
    pub fn from_tag(tag: &str) -> Result<Self, CoreError> {
        let name = tag.strip_suffix("-sync").unwrap_or(tag);
        match name {
            "sales" => Ok(SyncDomain::Sales),
            "stock" => Ok(SyncDomain::Stock),
            "purchase" => Ok(SyncDomain::Purchase),
            _ => Err(CoreError::UnknownSyncTag(tag.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDomain::Sales => "sales",
            SyncDomain::Stock => "stock",
            SyncDomain::Purchase => "purchase",
        }
    }

    /// Name of the durable queue (also the sync trigger tag).
    pub fn queue_name(&self) -> &'static str {
        match self {
            SyncDomain::Sales => "sales-sync",
            SyncDomain::Stock => "stock-sync",
            SyncDomain::Purchase => "purchase-sync",
        }
    }

    /// Human-readable operation label used in queued replies.
    pub fn operation(&self) -> &'static str {
        match self {
            SyncDomain::Sales => "sales",
            SyncDomain::Stock => "inventory",
            SyncDomain::Purchase => "purchase",
        }
    }
}

impl std::fmt::Display for SyncDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestSnapshot;

    fn get(url: &str, destination: RequestDestination) -> FetchRequest {
        FetchRequest::new(RequestSnapshot::get(url)).with_destination(destination)
    }

    #[test]
    fn test_navigation_is_network_first() {
        let route = classify(&FetchRequest::navigation("/sales/invoices"));
        assert_eq!(route.strategy, Strategy::NetworkFirst);
        assert_eq!(route.cache, Some(CacheKind::Dynamic));
    }

    #[test]
    fn test_assets_and_images_are_cache_first() {
        for dest in [
            RequestDestination::Style,
            RequestDestination::Script,
            RequestDestination::Worker,
        ] {
            let route = classify(&get("/static/js/bundle.js", dest));
            assert_eq!(route.strategy, Strategy::CacheFirst);
            assert_eq!(route.cache, Some(CacheKind::Assets));
        }

        let route = classify(&get("/api/products/1/photo", RequestDestination::Image));
        assert_eq!(route.cache, Some(CacheKind::Images));
    }

    #[test]
    fn test_api_reads_are_stale_while_revalidate() {
        let route = classify(&get("http://shop.local/api/stock?page=1", RequestDestination::Empty));
        assert_eq!(route.strategy, Strategy::StaleWhileRevalidate);
    }

    #[test]
    fn test_non_get_is_mutation() {
        let req = FetchRequest::new(RequestSnapshot::new("POST", "/api/sales"));
        assert_eq!(classify(&req).strategy, Strategy::Mutation);
        assert_eq!(classify(&req).cache, None);
    }

    #[test]
    fn test_other_reads_are_network_only() {
        let route = classify(&get("/favicon.ico", RequestDestination::Empty));
        assert_eq!(route.strategy, Strategy::NetworkOnly);
    }

    #[test]
    fn test_domain_from_url() {
        assert_eq!(SyncDomain::from_url("/api/sales/12"), Some(SyncDomain::Sales));
        assert_eq!(SyncDomain::from_url("/api/inventory/adjust"), Some(SyncDomain::Stock));
        assert_eq!(SyncDomain::from_url("/api/stock"), Some(SyncDomain::Stock));
        assert_eq!(SyncDomain::from_url("/api/purchase-orders"), Some(SyncDomain::Purchase));
        assert_eq!(SyncDomain::from_url("/api/customers"), None);
    }

    #[test]
    fn test_sync_tags() {
        assert_eq!(SyncDomain::from_tag("stock-sync").unwrap(), SyncDomain::Stock);
        assert_eq!(SyncDomain::from_tag("purchase").unwrap(), SyncDomain::Purchase);
        assert!(SyncDomain::from_tag("returns-sync").is_err());
        assert_eq!(SyncDomain::Sales.queue_name(), "sales-sync");
    }

    #[test]
    fn test_stale_cache_detection() {
        let names = CacheNames::new("stockroom", "v3");
        assert!(names.is_stale("stockroom-static-v2"));
        assert!(!names.is_stale("stockroom-static-v3"));
        assert!(!names.is_stale("third-party-fonts"));
        assert_eq!(names.current().len(), 5);
    }

    #[test]
    fn test_high_mutation_paths() {
        assert!(is_high_mutation("/api/stock/P1"));
        assert!(is_high_mutation("/api/inventory"));
        assert!(!is_high_mutation("/api/customers?q=stock"));
    }
}
