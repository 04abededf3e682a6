//! # stockroom-db: Database Layer for the Stockroom Engine
//!
//! This crate provides the engine's durable state on SQLite via sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockroom Data Flow                              │
//! │                                                                         │
//! │  Engine (queue manager, message broker, lifecycle)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockroom-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │    Schema    │  │   │
//! │  │   │   (pool.rs)   │    │               │    │              │  │   │
//! │  │   │               │    │ SyncQueueRepo │    │ migrations/  │  │   │
//! │  │   │ SqlitePool    │◄───│ OfflineStore  │    │ schema.rs    │  │   │
//! │  │   │               │    │  └ Table<K>   │    │ user_version │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │        <data dir>/com.stockroom.engine/stockroom.db             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Opening the database, pool sizing, status
//! - [`migrations`] - Embedded migrations for engine bookkeeping tables
//! - [`schema`] - Versioned offline collection schema
//! - [`table`] - Generic `Table<K>` over one collection
//! - [`repository`] - Sync queue repository and offline store
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockroom_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/stockroom.db")).await?;
//! db.offline().ensure_schema().await?;
//!
//! let matches = db.offline().lookup_barcode("5012345678900").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod schema;
pub mod table;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbStatus};
pub use table::{KeyParam, RecordId, RecordKey, Table};

// Repository re-exports for convenience
pub use repository::offline::OfflineStore;
pub use repository::queue::{QueuedRequest, SyncQueueRepository};
