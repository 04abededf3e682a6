//! # Database Error Types
//!
//! Every failure the offline store and the sync queue repository can report.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  caller input            storage                                       │
//! │  ─────────────           ───────                                       │
//! │  InvalidRecord           Connection / Migration / Query                │
//! │  MissingKey              PoolExhausted / Closed                        │
//! │  UnknownIndex            Serialization (stored JSON unreadable)        │
//! │       │                        │                                       │
//! │       ▼                        ▼                                       │
//! │  INVALID_PAYLOAD reply    reads degrade to empty, writes reply         │
//! │                           STORAGE_ERROR                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    // =========================================================================
    // Input Errors
    // =========================================================================
    /// A record that is not a JSON object was written to a collection.
    #[error("Invalid record for {collection}: {reason}")]
    InvalidRecord { collection: String, reason: String },

    /// A record for a keyed (non auto-increment) collection has no key.
    ///
    /// `CACHE_STOCK_DATA` with a record lacking `product_id` ends here.
    #[error("Record for {collection} is missing key field '{key_path}'")]
    MissingKey { collection: String, key_path: String },

    /// Query named an index the collection does not declare.
    #[error("Collection {collection} has no index '{index}'")]
    UnknownIndex { collection: String, index: String },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Stored JSON could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database file could not be opened.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Migration or schema upgrade failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// SQLite rejected a statement.
    #[error("Query failed: {0}")]
    Query(String),

    /// Every pooled connection stayed busy past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The pool was closed at shutdown.
    #[error("Database is closed")]
    Closed,
}

impl DbError {
    /// True for errors caused by the caller's input rather than storage.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DbError::InvalidRecord { .. } | DbError::MissingKey { .. } | DbError::UnknownIndex { .. }
        )
    }

    /// True when retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::PoolExhausted)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) => DbError::Query(format!("{} (code {code})", db_err.message())),
                None => DbError::Query(db_err.message().to_string()),
            },
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::Closed,
            sqlx::Error::Io(e) => DbError::Connection(e.to_string()),
            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Migration(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors() {
        let err = DbError::MissingKey {
            collection: "stock".to_string(),
            key_path: "product_id".to_string(),
        };
        assert!(err.is_input_error());
        assert_eq!(err.to_string(), "Record for stock is missing key field 'product_id'");
        assert!(!DbError::PoolExhausted.is_input_error());
    }

    #[test]
    fn test_pool_errors() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());

        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Closed));
        assert!(!err.is_transient());
    }
}
