//! # Request Router
//!
//! Serves every intercepted request with exactly one strategy.
//!
//! ## Strategy per Request
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RECEIVED ──► classify() ──┬─► NETWORK-FIRST   (navigations)            │
//! │                            ├─► CACHE-FIRST     (assets, images)         │
//! │                            ├─► STALE-WHILE-REVALIDATE (/api/* reads)    │
//! │                            ├─► NETWORK-ONLY    (other reads)            │
//! │                            └─► MUTATION        (non-GET)                │
//! │                                                                         │
//! │  each ends in exactly one of                                           │
//! │    CACHE_HIT_SERVED │ NETWORK_SERVED │ FALLBACK_SERVED │ QUEUED        │
//! │                                                                         │
//! │  FALLBACK: navigations ──► offline document                            │
//! │            everything else ──► 503 {"offline": true, ...}              │
//! │  QUEUED:   failed mutation in a sync domain ──► 202 {"queued": true}   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cache writes are spawned after the response is decided and never delay
//! it. Only 2xx network responses are cached. There are no retries here;
//! retrying belongs to the sync queues.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use stockroom_core::routing::is_high_mutation;
use stockroom_core::{
    classify, CacheKind, FetchRequest, HttpResponse, RequestSnapshot, Route, Strategy, SyncDomain,
};
use tracing::{debug, error, trace, warn};

use crate::context::EngineContext;

/// Served when the offline document itself is not cached.
const OFFLINE_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>Cached pages and offline sales keep working. \
Changes will sync when the connection returns.</p></body></html>";

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Served {
    CacheHit,
    Network,
    Fallback,
    Queued,
}

impl Served {
    pub fn as_str(&self) -> &'static str {
        match self {
            Served::CacheHit => "cache",
            Served::Network => "network",
            Served::Fallback => "fallback",
            Served::Queued => "queued",
        }
    }
}

/// Response plus how it was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub response: HttpResponse,
    pub served: Served,
}

impl Routed {
    fn new(response: HttpResponse, served: Served) -> Self {
        Routed { response, served }
    }
}

/// Synthesized 503 for reads that could be served neither way.
pub fn offline_response() -> HttpResponse {
    HttpResponse::json(
        503,
        &json!({
            "success": false,
            "offline": true,
            "error": "NETWORK_UNAVAILABLE",
            "message": "You are offline and this resource is not cached",
        }),
    )
}

/// 202 answered to a mutation that was queued for replay.
pub fn queued_response(domain: SyncDomain) -> HttpResponse {
    HttpResponse::json(
        202,
        &json!({
            "success": false,
            "queued": true,
            "operation": domain.operation(),
            "message": format!("Offline: {} change queued and will sync when online", domain.operation()),
        }),
    )
}

/// Serves one intercepted request.
///
/// ## Example
/// ```rust,ignore
/// let routed = router::route(&ctx, FetchRequest::new(RequestSnapshot::get("/api/products"))).await;
/// assert_eq!(routed.served, Served::CacheHit);
/// ```
pub async fn route(ctx: &Arc<EngineContext>, request: FetchRequest) -> Routed {
    if !ctx.lifecycle.is_active() {
        trace!(url = %request.request.url, "Engine not active, passing through");
        return pass_through(ctx, &request).await;
    }

    let route = classify(&request);
    debug!(
        method = %request.request.method,
        url = %request.request.url,
        strategy = ?route.strategy,
        "Routing request"
    );

    match route.strategy {
        Strategy::NetworkFirst => network_first(ctx, &request, route).await,
        Strategy::CacheFirst => cache_first(ctx, &request, route).await,
        Strategy::StaleWhileRevalidate => stale_while_revalidate(ctx, &request, route).await,
        Strategy::NetworkOnly => network_only(ctx, &request).await,
        Strategy::Mutation => mutation(ctx, request.request).await,
    }
}

async fn pass_through(ctx: &Arc<EngineContext>, request: &FetchRequest) -> Routed {
    match ctx.fetcher.fetch(&request.request).await {
        Ok(response) => Routed::new(response, Served::Network),
        Err(e) => {
            debug!(url = %request.request.url, error = %e, "Pass-through fetch failed");
            Routed::new(offline_response(), Served::Fallback)
        }
    }
}

// =============================================================================
// Strategies
// =============================================================================

async fn network_first(ctx: &Arc<EngineContext>, request: &FetchRequest, route: Route) -> Routed {
    match ctx.fetcher.fetch(&request.request).await {
        Ok(response) => {
            store_after_respond(ctx, route, &request.request, &response);
            Routed::new(response, Served::Network)
        }
        Err(e) => {
            debug!(url = %request.request.url, error = %e, "Network failed, trying cache");
            match lookup(ctx, route, &request.request) {
                Some(cached) => Routed::new(cached, Served::CacheHit),
                None => fallback(ctx, request),
            }
        }
    }
}

async fn cache_first(ctx: &Arc<EngineContext>, request: &FetchRequest, route: Route) -> Routed {
    if let Some(cached) = lookup(ctx, route, &request.request) {
        return Routed::new(cached, Served::CacheHit);
    }

    match ctx.fetcher.fetch(&request.request).await {
        Ok(response) => {
            store_after_respond(ctx, route, &request.request, &response);
            Routed::new(response, Served::Network)
        }
        Err(e) => {
            debug!(url = %request.request.url, error = %e, "Cache miss and network failed");
            fallback(ctx, request)
        }
    }
}

async fn stale_while_revalidate(ctx: &Arc<EngineContext>, request: &FetchRequest, route: Route) -> Routed {
    let Some(cached) = lookup(ctx, route, &request.request) else {
        return match ctx.fetcher.fetch(&request.request).await {
            Ok(response) => {
                store_after_respond(ctx, route, &request.request, &response);
                Routed::new(response, Served::Network)
            }
            Err(e) => {
                debug!(url = %request.request.url, error = %e, "No cached copy and network failed");
                fallback(ctx, request)
            }
        };
    };

    let task_ctx = Arc::clone(ctx);
    let snapshot = request.request.clone();
    tokio::spawn(async move {
        match task_ctx.fetcher.fetch(&snapshot).await {
            Ok(fresh) => store(&task_ctx, route, &snapshot, fresh),
            Err(e) => trace!(url = %snapshot.url, error = %e, "Background revalidation failed"),
        }
    });

    Routed::new(cached, Served::CacheHit)
}

async fn network_only(ctx: &Arc<EngineContext>, request: &FetchRequest) -> Routed {
    match ctx.fetcher.fetch(&request.request).await {
        Ok(response) => Routed::new(response, Served::Network),
        Err(_) => fallback(ctx, request),
    }
}

/// Sends a mutation; on network failure queues it in its domain.
async fn mutation(ctx: &Arc<EngineContext>, request: RequestSnapshot) -> Routed {
    let err = match ctx.fetcher.fetch(&request).await {
        Ok(response) => return Routed::new(response, Served::Network),
        Err(e) => e,
    };

    let Some(domain) = SyncDomain::from_url(&request.url) else {
        warn!(method = %request.method, url = %request.url, error = %err, "Mutation failed outside any sync domain");
        return Routed::new(offline_response(), Served::Fallback);
    };

    match ctx.queues.enqueue(domain, &request).await {
        Ok(_) => Routed::new(queued_response(domain), Served::Queued),
        Err(e) => {
            error!(domain = %domain, url = %request.url, error = %e, "Failed to queue mutation");
            Routed::new(offline_response(), Served::Fallback)
        }
    }
}

// =============================================================================
// Cache Helpers
// =============================================================================

/// Looks in the route's cache, then in the app-shell cache.
fn lookup(ctx: &EngineContext, route: Route, request: &RequestSnapshot) -> Option<HttpResponse> {
    let key = request.cache_key();
    route
        .cache
        .and_then(|kind| ctx.cache.get(&ctx.names.name(kind), &key))
        .or_else(|| ctx.cache.get(&ctx.names.name(CacheKind::Static), &key))
}

fn fallback(ctx: &EngineContext, request: &FetchRequest) -> Routed {
    if !request.navigate {
        return Routed::new(offline_response(), Served::Fallback);
    }

    let offline_key = RequestSnapshot::get(ctx.config.app.offline_page.as_str()).cache_key();
    let document = ctx
        .cache
        .get(&ctx.names.name(CacheKind::Static), &offline_key)
        .unwrap_or_else(|| HttpResponse::html(503, OFFLINE_HTML));
    Routed::new(document, Served::Fallback)
}

fn store_after_respond(ctx: &Arc<EngineContext>, route: Route, request: &RequestSnapshot, response: &HttpResponse) {
    if route.cache.is_none() || !response.is_success() {
        return;
    }
    let task_ctx = Arc::clone(ctx);
    let request = request.clone();
    let response = response.clone();
    tokio::spawn(async move {
        store(&task_ctx, route, &request, response);
    });
}

fn store(ctx: &EngineContext, route: Route, request: &RequestSnapshot, response: HttpResponse) {
    let Some(kind) = route.cache else {
        return;
    };
    if !response.is_success() {
        return;
    }

    let name = ctx.names.name(kind);
    let key = request.cache_key();
    if kind == CacheKind::Api && is_high_mutation(&request.url) {
        ctx.cache.put_with_ttl(&name, &key, response, ctx.config.cache.stock_ttl());
    } else {
        ctx.cache.put(&name, &key, response);
    }
    trace!(cache = %name, key = %key, "Response cached");
}
