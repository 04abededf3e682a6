//! # Network Fetcher
//!
//! The one place the engine talks to the upstream origin.
//!
//! The fetcher is a trait so the router, queue manager and lifecycle can be
//! driven by a scripted [`MockFetcher`] in tests and by [`HttpFetcher`]
//! (reqwest) in the binary.
//!
//! ```text
//! RequestSnapshot { method, "/api/sales", headers, body }
//!        │
//!        ▼  resolve against upstream
//! POST https://shop.example/api/sales
//!        │
//!        ├── transport ok ──► HttpResponse { status, headers, body }
//!        └── transport err ─► SyncError::NetworkUnavailable / Timeout
//! ```
//!
//! A response with any status is `Ok`. Deciding what a 5xx means is left to
//! the caller.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use stockroom_core::{HttpResponse, RequestSnapshot};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Headers never forwarded upstream.
const HOP_BY_HOP: [&str; 6] = [
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
];

/// Performs network requests on behalf of the engine.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Sends `request` upstream.
    ///
    /// ## Returns
    /// * `Ok(response)` - The transport succeeded (any status)
    /// * `Err(_)` - The upstream could not be reached
    async fn fetch(&self, request: &RequestSnapshot) -> SyncResult<HttpResponse>;
}

// =============================================================================
// HTTP Fetcher
// =============================================================================

/// reqwest-backed fetcher resolving paths against a fixed origin.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    upstream: Url,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher for `upstream_url`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let fetcher = HttpFetcher::new("https://shop.example", Duration::from_secs(30))?;
    /// ```
    pub fn new(upstream_url: &str, timeout: Duration) -> SyncResult<Self> {
        let upstream = Url::parse(upstream_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpFetcher {
            client,
            upstream,
            timeout,
        })
    }

    /// Absolute URL of a request. Absolute request URLs are kept as they are.
    pub fn resolve(&self, url: &str) -> SyncResult<Url> {
        Ok(self.upstream.join(url)?)
    }

    fn headers(request: &RequestSnapshot) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "Dropping header that is not valid HTTP"),
            }
        }
        headers
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &RequestSnapshot) -> SyncResult<HttpResponse> {
        let url = self.resolve(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| SyncError::Internal(format!("invalid method {}: {e}", request.method)))?;

        trace!(method = %method, url = %url, "Fetching upstream");

        let mut builder = self
            .client
            .request(method, url.clone())
            .headers(Self::headers(request));
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| match SyncError::from(e) {
            SyncError::Timeout(_) => SyncError::Timeout(self.timeout.as_secs()),
            other => other,
        })?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        debug!(url = %url, status, bytes = body.len(), "Upstream responded");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

// =============================================================================
// Mock Fetcher
// =============================================================================

/// Scripted outcome of one mock request.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Respond(HttpResponse),
    Fail(String),
}

/// A fetcher that answers from a script instead of the network.
///
/// Each `"METHOD url"` key has a queue of one-shot outcomes and an optional
/// standing outcome used once the queue is empty. Unscripted requests fail
/// as if the network were down. Every request is recorded.
#[derive(Debug, Default)]
pub struct MockFetcher {
    once: Mutex<HashMap<String, VecDeque<MockOutcome>>>,
    always: Mutex<HashMap<String, MockOutcome>>,
    offline: Mutex<bool>,
    log: Mutex<Vec<RequestSnapshot>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(method: &str, url: &str) -> String {
        format!("{} {}", method.to_ascii_uppercase(), url)
    }

    /// Always answers `method url` with `response`.
    pub fn respond(&self, method: &str, url: &str, response: HttpResponse) -> &Self {
        self.always
            .lock()
            .insert(Self::key(method, url), MockOutcome::Respond(response));
        self
    }

    /// Answers the next `method url` with `response`, then falls back.
    pub fn respond_once(&self, method: &str, url: &str, response: HttpResponse) -> &Self {
        self.push_once(method, url, MockOutcome::Respond(response))
    }

    /// Fails the next `method url`, then falls back.
    pub fn fail_once(&self, method: &str, url: &str) -> &Self {
        self.push_once(method, url, MockOutcome::Fail("scripted failure".into()))
    }

    fn push_once(&self, method: &str, url: &str, outcome: MockOutcome) -> &Self {
        self.once
            .lock()
            .entry(Self::key(method, url))
            .or_default()
            .push_back(outcome);
        self
    }

    /// Makes every request fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<RequestSnapshot> {
        self.log.lock().clone()
    }

    /// How many times `method url` was requested.
    pub fn count(&self, method: &str, url: &str) -> usize {
        let method = method.to_ascii_uppercase();
        self.log
            .lock()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    fn outcome(&self, request: &RequestSnapshot) -> MockOutcome {
        if *self.offline.lock() {
            return MockOutcome::Fail("offline".into());
        }

        let key = Self::key(&request.method, &request.url);
        if let Some(outcome) = self.once.lock().get_mut(&key).and_then(VecDeque::pop_front) {
            return outcome;
        }
        self.always
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| MockOutcome::Fail(format!("no script for {key}")))
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &RequestSnapshot) -> SyncResult<HttpResponse> {
        self.log.lock().push(request.clone());
        match self.outcome(request) {
            MockOutcome::Respond(response) => Ok(response),
            MockOutcome::Fail(reason) => Err(SyncError::NetworkUnavailable(reason)),
        }
    }
}
