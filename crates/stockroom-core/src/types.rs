//! # Domain Types
//!
//! Core types shared by the engine crates.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐      │
//! │  │ RequestSnapshot  │  │  FetchRequest    │  │  HttpResponse    │      │
//! │  │  ──────────────  │  │  ──────────────  │  │  ──────────────  │      │
//! │  │  method          │  │  request         │  │  status          │      │
//! │  │  url             │  │  destination     │  │  headers         │      │
//! │  │  headers         │  │  navigate        │  │  body            │      │
//! │  │  body            │  └──────────────────┘  └──────────────────┘      │
//! │  └──────────────────┘                                                   │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐                            │
//! │  │   Collection     │  │  BarcodeMatch    │                            │
//! │  │  ──────────────  │  │  ──────────────  │                            │
//! │  │  Sales, Stock,   │  │  product         │                            │
//! │  │  Products, ...   │  │  stock           │                            │
//! │  └──────────────────┘  └──────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Requests
// =============================================================================

/// A full snapshot of an HTTP request.
///
/// This is what the sync queues persist: replay sends exactly these bytes
/// again, so every field is captured, including the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    /// HTTP method, upper case (`GET`, `POST`, ...).
    pub method: String,

    /// Request URL. Either a path (`/api/sales?x=1`) or an absolute URL.
    pub url: String,

    /// Request headers with lower-cased names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw request body.
    #[serde(default)]
    pub body: Option<Vec<u8>>,
}

impl RequestSnapshot {
    /// Creates a body-less request.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        RequestSnapshot {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Builds a JSON request (sets `content-type`).
    pub fn json(method: impl Into<String>, url: impl Into<String>, body: &Value) -> Self {
        let mut request = Self::new(method, url);
        request
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        request.body = Some(body.to_string().into_bytes());
        request
    }

    /// Adds a header (name is lower-cased).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns true for `GET` and `HEAD`.
    pub fn is_read(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD")
    }

    /// Returns the path component of the URL (no origin, query or fragment).
    pub fn path(&self) -> &str {
        url_path(&self.url)
    }

    /// Cache key: method plus URL.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Extracts the path from a path-or-absolute URL.
///
/// ```
/// use stockroom_core::types::url_path;
/// assert_eq!(url_path("https://shop.example/api/stock?page=2"), "/api/stock");
/// assert_eq!(url_path("/api/sales#top"), "/api/sales");
/// ```
pub fn url_path(url: &str) -> &str {
    let without_origin = match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => url,
    };

    let end = without_origin
        .find(['?', '#'])
        .unwrap_or(without_origin.len());
    &without_origin[..end]
}

/// What kind of resource the foreground asked for.
///
/// Mirrors the `Sec-Fetch-Dest` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDestination {
    Document,
    Style,
    Script,
    Worker,
    Image,
    Font,
    Manifest,
    #[default]
    Empty,
}

impl RequestDestination {
    /// Parses a `Sec-Fetch-Dest` value. Unknown values map to `Empty`.
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => RequestDestination::Document,
            "style" => RequestDestination::Style,
            "script" => RequestDestination::Script,
            "worker" | "sharedworker" | "serviceworker" => RequestDestination::Worker,
            "image" => RequestDestination::Image,
            "font" => RequestDestination::Font,
            "manifest" => RequestDestination::Manifest,
            _ => RequestDestination::Empty,
        }
    }
}

/// An intercepted request, as seen by the request router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// The request itself.
    pub request: RequestSnapshot,

    /// Resource kind requested by the foreground.
    pub destination: RequestDestination,

    /// True for top-level navigations.
    pub navigate: bool,
}

impl FetchRequest {
    /// Wraps a request with an empty destination.
    pub fn new(request: RequestSnapshot) -> Self {
        FetchRequest {
            request,
            destination: RequestDestination::Empty,
            navigate: false,
        }
    }

    /// A navigation request for a document.
    pub fn navigation(url: impl Into<String>) -> Self {
        FetchRequest {
            request: RequestSnapshot::get(url),
            destination: RequestDestination::Document,
            navigate: true,
        }
    }

    /// Sets the destination.
    pub fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }
}

// =============================================================================
// Responses
// =============================================================================

/// An HTTP response, either from the network or from a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,

    /// Response headers with lower-cased names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw body.
    #[serde(default)]
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// JSON response.
    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    /// HTML response.
    pub fn html(status: u16, html: &str) -> Self {
        Self::new(status, html).with_header("content-type", "text/html; charset=utf-8")
    }

    /// Adds a header (name is lower-cased).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns true for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    pub fn json_body(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

// =============================================================================
// Offline Collections
// =============================================================================

/// The collections of the offline data store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Collection {
    Sales,
    Stock,
    Products,
    Customers,
    Suppliers,
    PendingUploads,
}

impl Collection {
    /// Every collection, in schema order.
    pub const ALL: [Collection; 6] = [
        Collection::Sales,
        Collection::Stock,
        Collection::Products,
        Collection::Customers,
        Collection::Suppliers,
        Collection::PendingUploads,
    ];

    /// Table name of the collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Sales => "sales",
            Collection::Stock => "stock",
            Collection::Products => "products",
            Collection::Customers => "customers",
            Collection::Suppliers => "suppliers",
            Collection::PendingUploads => "pending_uploads",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sales" | "sale" => Ok(Collection::Sales),
            "stock" | "inventory" => Ok(Collection::Stock),
            "products" | "product" => Ok(Collection::Products),
            "customers" | "customer" => Ok(Collection::Customers),
            "suppliers" | "supplier" => Ok(Collection::Suppliers),
            "pending_uploads" | "pending-uploads" | "uploads" => Ok(Collection::PendingUploads),
            other => Err(CoreError::UnknownCollection(other.to_string())),
        }
    }
}

/// Result of a barcode lookup: the product joined with its stock record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BarcodeMatch {
    /// The product record, as cached.
    pub product: Value,

    /// The stock record for the product, unchanged, or
    /// `{"quantity": 0, "last_updated": null}` when none is cached.
    pub stock: Value,
}

impl BarcodeMatch {
    pub fn new(product: Value, stock: Option<Value>) -> Self {
        BarcodeMatch {
            product,
            stock: stock.unwrap_or_else(Self::unknown_stock),
        }
    }

    /// Stock reported for a product with no stock row.
    pub fn unknown_stock() -> Value {
        serde_json::json!({ "quantity": 0, "last_updated": null })
    }

    pub fn has_stock_record(&self) -> bool {
        self.stock != Self::unknown_stock()
    }
}

/// Serde helpers for identifiers that arrive as JSON strings or numbers.
pub(crate) mod id_text {
    use serde::de::{self, Deserializer};
    use serde::Deserialize;
    use serde_json::Value;

    fn text(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// A required identifier: string or number.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let shown = value.to_string();
        text(value).ok_or_else(|| de::Error::custom(format!("expected a string or number, got {shown}")))
    }

    /// An optional identifier. Values of any other JSON type read as absent.
    pub mod lenient {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
            Value::deserialize(deserializer).map(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("/api/stock"), "/api/stock");
        assert_eq!(url_path("/api/stock?category=a"), "/api/stock");
        assert_eq!(url_path("http://localhost:3000"), "/");
        assert_eq!(url_path("http://localhost:3000/static/main.css?v=2"), "/static/main.css");
    }

    #[test]
    fn test_snapshot_method_is_uppercased() {
        let req = RequestSnapshot::new("post", "/api/sales");
        assert_eq!(req.method, "POST");
        assert!(!req.is_read());
        assert_eq!(req.cache_key(), "POST /api/sales");
    }

    #[test]
    fn test_destination_parsing() {
        assert_eq!(RequestDestination::from_fetch_dest("script"), RequestDestination::Script);
        assert_eq!(RequestDestination::from_fetch_dest("serviceworker"), RequestDestination::Worker);
        assert_eq!(RequestDestination::from_fetch_dest(""), RequestDestination::Empty);
    }

    #[test]
    fn test_collection_parsing() {
        assert_eq!("stock".parse::<Collection>().unwrap(), Collection::Stock);
        assert_eq!("product".parse::<Collection>().unwrap(), Collection::Products);
        assert!("widgets".parse::<Collection>().is_err());
    }

    #[test]
    fn test_barcode_match_keeps_stock_record() {
        let stock = serde_json::json!({"product_id": "P1", "quantity": 2.5, "location": "A1"});
        let found = BarcodeMatch::new(serde_json::json!({"id": "P1"}), Some(stock.clone()));
        assert_eq!(found.stock, stock);
        assert!(found.has_stock_record());

        let missing = BarcodeMatch::new(serde_json::json!({"id": "P2"}), None);
        assert_eq!(missing.stock, serde_json::json!({"quantity": 0, "last_updated": null}));
        assert!(!missing.has_stock_record());
    }

    #[derive(Debug, Deserialize)]
    struct Scanned {
        #[serde(deserialize_with = "id_text::deserialize")]
        code: String,
    }

    #[test]
    fn test_identifier_accepts_numbers() {
        let scanned: Scanned = serde_json::from_str(r#"{"code": 5012345}"#).unwrap();
        assert_eq!(scanned.code, "5012345");
        let scanned: Scanned = serde_json::from_str(r#"{"code": "0012"}"#).unwrap();
        assert_eq!(scanned.code, "0012");
        assert!(serde_json::from_str::<Scanned>(r#"{"code": null}"#).is_err());
    }
}
