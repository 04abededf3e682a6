//! # Engine Message Protocol
//!
//! Message types exchanged between the foreground application and the engine.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Protocol Messages                           │
//! │                                                                         │
//! │  LIFECYCLE                                                             │
//! │  ─────────                                                             │
//! │  APP ───► SKIP_WAITING                                                 │
//! │                                                                         │
//! │  OFFLINE STORE                                                         │
//! │  ─────────────                                                         │
//! │  APP ───► CACHE_STOCK_DATA / CACHE_PRODUCT_DATA / ...  { record(s) }   │
//! │  APP ───► GET_CACHED_DATA { type, query }                              │
//! │  APP ───► BARCODE_SCAN { barcode }                                     │
//! │  APP ───► OFFLINE_SALES_ENTRY { ...sale }                              │
//! │                                                                         │
//! │  QUEUES & CACHES                                                       │
//! │  ───────────────                                                       │
//! │  APP ───► SYNC_STATUS                                                  │
//! │  APP ───► CLEAR_CACHE { cacheType }                                    │
//! │                                                                         │
//! │  EVERY COMMAND                                                         │
//! │  ─────────────                                                         │
//! │  APP ◄─── { success, data?, message?, code? }   (exactly one reply)    │
//! │                                                                         │
//! │  ENGINE → CLIENTS (broadcast)                                          │
//! │  ────────────────────────────                                          │
//! │  SYNC_REPLAYED / CONTROLLER_CHANGED / FOCUS / NAVIGATE / OPEN_WINDOW   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Commands are serialized as adjacently tagged JSON:
//! ```json
//! { "type": "BARCODE_SCAN", "data": { "barcode": "5012345678900" } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::routing::SyncDomain;

/// Every command `type` the engine accepts.
pub const COMMAND_TYPES: [&str; 10] = [
    "SKIP_WAITING",
    "CACHE_STOCK_DATA",
    "CACHE_PRODUCT_DATA",
    "CACHE_CUSTOMER_DATA",
    "CACHE_SALES_DATA",
    "GET_CACHED_DATA",
    "BARCODE_SCAN",
    "SYNC_STATUS",
    "CLEAR_CACHE",
    "OFFLINE_SALES_ENTRY",
];

// =============================================================================
// Commands
// =============================================================================

/// A command sent by the foreground application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum EngineCommand {
    /// Activate an installed engine without waiting.
    SkipWaiting,

    // =========================================================================
    // Offline Store Writes
    // =========================================================================
    CacheStockData(RecordBatch),
    CacheProductData(RecordBatch),
    CacheCustomerData(RecordBatch),
    CacheSalesData(RecordBatch),

    // =========================================================================
    // Offline Store Reads
    // =========================================================================
    GetCachedData(CachedDataRequest),
    BarcodeScan(BarcodeScanRequest),

    // =========================================================================
    // Queues & Caches
    // =========================================================================
    SyncStatus,
    ClearCache(ClearCacheRequest),

    /// A sale recorded while the foreground believed it was offline.
    OfflineSalesEntry(Value),
}

impl EngineCommand {
    /// Parses a raw message.
    ///
    /// Unknown `type` values become [`CoreError::UnknownCommand`] rather than
    /// a generic decode failure, so the reply can say so.
    pub fn parse(message: Value) -> CoreResult<Self> {
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MalformedMessage("missing string field `type`".to_string()))?
            .to_string();

        if !COMMAND_TYPES.contains(&kind.as_str()) {
            return Err(CoreError::UnknownCommand(kind));
        }

        serde_json::from_value(message).map_err(|e| CoreError::InvalidPayload {
            command: kind,
            reason: e.to_string(),
        })
    }

    /// Returns the command type name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            EngineCommand::SkipWaiting => "SKIP_WAITING",
            EngineCommand::CacheStockData(_) => "CACHE_STOCK_DATA",
            EngineCommand::CacheProductData(_) => "CACHE_PRODUCT_DATA",
            EngineCommand::CacheCustomerData(_) => "CACHE_CUSTOMER_DATA",
            EngineCommand::CacheSalesData(_) => "CACHE_SALES_DATA",
            EngineCommand::GetCachedData(_) => "GET_CACHED_DATA",
            EngineCommand::BarcodeScan(_) => "BARCODE_SCAN",
            EngineCommand::SyncStatus => "SYNC_STATUS",
            EngineCommand::ClearCache(_) => "CLEAR_CACHE",
            EngineCommand::OfflineSalesEntry(_) => "OFFLINE_SALES_ENTRY",
        }
    }
}

// =============================================================================
// Command Payloads
// =============================================================================

/// One record or an array of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
pub enum RecordBatch {
    Many(Vec<Value>),
    One(Value),
}

impl RecordBatch {
    pub fn into_records(self) -> Vec<Value> {
        match self {
            RecordBatch::Many(records) => records,
            RecordBatch::One(record) => vec![record],
        }
    }
}

/// Filter for reading a collection.
///
/// With `index` and `value` set, only records whose indexed field equals
/// `value` are returned. `limit` caps the result either way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct RecordQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl RecordQuery {
    pub fn all() -> Self {
        RecordQuery::default()
    }

    pub fn by_index(index: impl Into<String>, value: impl Into<Value>) -> Self {
        RecordQuery {
            index: Some(index.into()),
            value: Some(value.into()),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// `GET_CACHED_DATA` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct CachedDataRequest {
    /// Collection name (`stock`, `products`, ...).
    #[serde(rename = "type")]
    pub collection: String,

    #[serde(default)]
    pub query: RecordQuery,
}

/// `BARCODE_SCAN` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct BarcodeScanRequest {
    #[serde(deserialize_with = "crate::types::id_text::deserialize")]
    pub barcode: String,
}

/// `CLEAR_CACHE` payload: `"all"` or one cache kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheRequest {
    pub cache_type: String,
}

// =============================================================================
// Replies
// =============================================================================

/// Machine-readable failure codes carried by command replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ErrorCode {
    UnknownCommand,
    InvalidPayload,
    UnknownCollection,
    UnknownCacheType,
    NotFound,
    StorageError,
    NetworkUnavailable,
    InvalidState,
    Internal,
}

impl From<&CoreError> for ErrorCode {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            CoreError::MalformedMessage(_) | CoreError::InvalidPayload { .. } => {
                ErrorCode::InvalidPayload
            }
            CoreError::UnknownCollection(_) => ErrorCode::UnknownCollection,
            CoreError::UnknownCacheType(_) => ErrorCode::UnknownCacheType,
            CoreError::UnknownSyncTag(_) => ErrorCode::InvalidPayload,
        }
    }
}

/// The single reply to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommandReply {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl CommandReply {
    /// Success carrying data.
    pub fn ok(data: Value) -> Self {
        CommandReply {
            success: true,
            data: Some(data),
            message: None,
            code: None,
        }
    }

    /// Success carrying only a message.
    pub fn done(message: impl Into<String>) -> Self {
        CommandReply {
            success: true,
            data: None,
            message: Some(message.into()),
            code: None,
        }
    }

    /// Failure.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        CommandReply {
            success: false,
            data: None,
            message: Some(message.into()),
            code: Some(code),
        }
    }
}

impl From<CoreError> for CommandReply {
    fn from(err: CoreError) -> Self {
        CommandReply::error(ErrorCode::from(&err), err.to_string())
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Pending entries per queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct QueueLengths {
    pub sales: u64,
    pub stock: u64,
    pub purchase: u64,
}

impl QueueLengths {
    pub fn set(&mut self, domain: SyncDomain, len: u64) {
        match domain {
            SyncDomain::Sales => self.sales = len,
            SyncDomain::Stock => self.stock = len,
            SyncDomain::Purchase => self.purchase = len,
        }
    }

    pub fn total(&self) -> u64 {
        self.sales + self.stock + self.purchase
    }
}

/// `SYNC_STATUS` reply data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatusReport {
    pub queues: QueueLengths,
    pub total_pending: u64,

    /// Last time any queue replayed an entry successfully.
    #[ts(as = "Option<String>")]
    pub last_sync: Option<DateTime<Utc>>,

    pub online: bool,
}

// =============================================================================
// Client Events
// =============================================================================

/// Events the engine broadcasts to open application instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ClientEvent {
    /// A queued request was replayed successfully.
    SyncReplayed {
        domain: SyncDomain,
        method: String,
        url: String,
        entry_id: i64,
    },

    /// The engine took control of the listed client.
    ControllerChanged { client_id: String, version: String },

    /// Bring an existing window to the front, at `url`.
    Focus { client_id: String, url: String },

    /// Navigate an existing window to `url`.
    Navigate { client_id: String, url: String },

    /// Open a new window at `url`.
    OpenWindow { url: String },
}

impl ClientEvent {
    /// Serializes to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
