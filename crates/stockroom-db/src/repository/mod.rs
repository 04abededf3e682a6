//! # Repository Module
//!
//! Database repository implementations for the Stockroom engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Engine component (queue manager, broker)                              │
//! │       │                                                                 │
//! │       │  db.sync_queue().peek("sales-sync")                            │
//! │       │  db.offline().lookup_barcode("5000...")                        │
//! │       ▼                                                                 │
//! │  SyncQueueRepository            OfflineStore                           │
//! │  ├── enqueue / peek / remove    ├── put / get_all / get / delete       │
//! │  ├── mark_failed / len / clear  ├── clear / count                      │
//! │  └── record_success / last_sync └── lookup_barcode                     │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`SyncQueueRepository`](queue::SyncQueueRepository) - Durable sync queues
//! - [`OfflineStore`](offline::OfflineStore) - Offline collections

pub mod offline;
pub mod queue;
