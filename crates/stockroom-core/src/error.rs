//! # Error Types
//!
//! Domain-specific error types for stockroom-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockroom-core errors (this file)                                     │
//! │  └── CoreError        - Protocol and classification errors             │
//! │                                                                         │
//! │  stockroom-db errors (separate crate)                                  │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  stockroom-sync errors (separate crate)                                │
//! │  └── SyncError        - Network, queue, lifecycle failures             │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → CommandReply { code } → Foreground      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised by the pure engine rules.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A message arrived with a `type` the engine does not know.
    #[error("Unknown command type: {0}")]
    UnknownCommand(String),

    /// A message was not a JSON object with a string `type`.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A known command carried a payload of the wrong shape.
    ///
    /// ## When This Occurs
    /// - `BARCODE_SCAN` without a `barcode`
    /// - `GET_CACHED_DATA` whose `query.limit` is not a number
    #[error("Invalid payload for {command}: {reason}")]
    InvalidPayload { command: String, reason: String },

    /// The requested offline collection does not exist.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// `CLEAR_CACHE` named a cache type that is not configured.
    #[error("Unknown cache type: {0}")]
    UnknownCacheType(String),

    /// A sync tag that does not map to a queue.
    #[error("Unknown sync tag: {0}")]
    UnknownSyncTag(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
