//! # Engine Error Types
//!
//! Error types for the offline engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Network      │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NetworkUnavail │  │  Core (unknown command, │ │
//! │  │  InvalidUrl     │  │  UpstreamStatus │  │   bad payload, ...)     │ │
//! │  │  ConfigLoad/Save│  │  Timeout        │  │  SerializationFailed    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │   Lifecycle     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Database       │  │  InstallFailed  │  │  ChannelError           │ │
//! │  │                 │  │  InvalidState   │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Network errors are transient: they block a queue or trigger a cache
//! fallback, never more. Lifecycle errors are the only ones that abort.

use stockroom_core::{CoreError, ErrorCode};
use stockroom_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error type covering all possible engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Invalid upstream URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    /// The upstream could not be reached at all.
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The upstream answered with a server error.
    #[error("Upstream answered {status}")]
    UpstreamStatus { status: u16 },

    /// Request timeout.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Rejected command or classification input.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failed to serialize or parse JSON.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Offline store or queue operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// An install step failed; installation is aborted.
    #[error("Install failed: {0}")]
    InstallFailed(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("Engine is {actual}, expected {expected}")]
    InvalidState { expected: String, actual: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// HTTP server could not start.
    #[error("Server error: {0}")]
    ServerFailed(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine is shutting down.
    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(0)
        } else if err.is_builder() {
            SyncError::InvalidUrl(err.to_string())
        } else {
            SyncError::NetworkUnavailable(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Network unavailable
    /// - Upstream 5xx
    /// - Timeouts
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Rejected commands
    /// - Lifecycle failures
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NetworkUnavailable(_)
                | SyncError::UpstreamStatus { .. }
                | SyncError::Timeout(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Machine-readable code for command replies.
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::Core(core) => ErrorCode::from(core),
            SyncError::Database(db) if db.is_input_error() => ErrorCode::InvalidPayload,
            SyncError::Database(_) => ErrorCode::StorageError,
            SyncError::SerializationFailed(_) => ErrorCode::InvalidPayload,
            SyncError::NetworkUnavailable(_) | SyncError::UpstreamStatus { .. } | SyncError::Timeout(_) => {
                ErrorCode::NetworkUnavailable
            }
            SyncError::InvalidState { .. } | SyncError::InstallFailed(_) => ErrorCode::InvalidState,
            _ => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::NetworkUnavailable("refused".into()).is_retryable());
        assert!(SyncError::UpstreamStatus { status: 503 }.is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::InstallFailed("shell".into()).is_retryable());
    }

    #[test]
    fn test_reply_codes() {
        let err = SyncError::from(CoreError::UnknownCommand("X".into()));
        assert_eq!(err.code(), ErrorCode::UnknownCommand);

        let err = SyncError::from(DbError::MissingKey {
            collection: "stock".into(),
            key_path: "product_id".into(),
        });
        assert_eq!(err.code(), ErrorCode::InvalidPayload);

        let err = SyncError::from(DbError::PoolExhausted);
        assert_eq!(err.code(), ErrorCode::StorageError);
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
        assert!(!SyncError::ShuttingDown.is_config_error());
    }
}
