//! # stockroom-core: Pure Rules for the Stockroom Offline Engine
//!
//! This crate holds the decisions of the offline engine as pure functions
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Stockroom Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Foreground application (browser)                │   │
//! │  │     fetch() ──► engine proxy      postMessage ──► /__engine     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP / WebSocket                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 stockroom-sync (the engine)                     │   │
//! │  │   router, cache store, sync queues, broker, lifecycle           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockroom-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌────────────┐  │   │
//! │  │   │   types   │  │  routing  │  │ protocol  │  │notification│  │   │
//! │  │   │ requests  │  │ classify  │  │ commands  │  │ push → UI  │  │   │
//! │  │   │ records   │  │ domains   │  │ replies   │  │ deep links │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Request/response snapshots, offline collections
//! - [`routing`] - Request classification, cache naming, sync domains
//! - [`protocol`] - Foreground ↔ engine commands and replies
//! - [`notification`] - Push payloads and click routing
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod notification;
pub mod protocol;
pub mod routing;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use protocol::{ClientEvent, CommandReply, EngineCommand, ErrorCode, RecordQuery};
pub use routing::{classify, CacheKind, CacheNames, Route, Strategy, SyncDomain};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Namespace prefix of every cache the engine owns.
pub const DEFAULT_NAMESPACE: &str = "stockroom";

/// Cache version used when none is configured.
pub const DEFAULT_CACHE_VERSION: &str = "v1";

/// Short TTL applied to stock/inventory API responses, in seconds.
pub const STOCK_TTL_SECS: u64 = 300;
