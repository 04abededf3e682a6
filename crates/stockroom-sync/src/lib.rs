//! # stockroom-sync: Offline Engine for Stockroom
//!
//! This crate is the offline-first engine: it intercepts the application's
//! network traffic, caches what can be cached, queues what cannot be sent,
//! and mirrors reference data for offline reads.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Engine Architecture                      │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 server (axum)  ──►  Arc<EngineContext>           │  │
//! │  └───────┬─────────────────────┬─────────────────────┬──────────────┘  │
//! │          ▼                     ▼                     ▼                  │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Request Router │  │ Message Broker │  │ Lifecycle Controller   │    │
//! │  │                │  │                │  │                        │    │
//! │  │ network-first  │  │ typed commands │  │ install: shell+schema  │    │
//! │  │ cache-first    │  │ oneshot reply  │  │ activate: drop stale   │    │
//! │  │ stale-while-   │  │ one task each  │  │ caches, claim clients  │    │
//! │  │ revalidate     │  │                │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └──────────┬─────────────┘    │
//! │          │                   │                      │                  │
//! │          ▼                   ▼                      ▼                  │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  Cache Store   │  │ Offline Store  │  │  Sync Queue Manager    │    │
//! │  │ named, bounded │  │ (stockroom-db) │  │ FIFO per domain,       │    │
//! │  │ by count & age │  │ Table<K> each  │  │ replay on reconnect    │    │
//! │  └────────────────┘  └────────────────┘  └──────────┬─────────────┘    │
//! │                                                     ▼                  │
//! │                            ┌──────────────────────────────────────┐    │
//! │                            │ Clients (events) + Notifications     │    │
//! │                            └──────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Engine configuration (TOML + env)
//! - [`error`] - Engine error types
//! - [`cache`] - Named response caches
//! - [`fetch`] - Upstream fetcher trait, reqwest and scripted implementations
//! - [`router`] - Per-request caching strategies
//! - [`queue`] - Durable sync queues and connectivity
//! - [`broker`] - Foreground command execution
//! - [`lifecycle`] - Install and activation
//! - [`clients`] - Open application instances and their event stream
//! - [`notify`] - Push notifications and click routing
//! - [`context`] - The shared `EngineContext`
//! - [`server`] - axum HTTP/WebSocket surface
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockroom_sync::{EngineConfig, EngineContext};
//!
//! let config = EngineConfig::load_or_default(None);
//! let addr = config.bind_addr()?;
//! let ctx = EngineContext::open(config).await?;
//!
//! ctx.install().await?;
//! ctx.activate().await?;
//!
//! let handle = stockroom_sync::server::start(ctx, addr).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod broker;
pub mod cache;
pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod notify;
pub mod queue;
pub mod router;
pub mod server;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::CacheStore;
pub use clients::{Client, ClientRegistry};
pub use config::{CacheLimits, EngineConfig};
pub use context::EngineContext;
pub use error::{SyncError, SyncResult};
pub use fetch::{Fetcher, HttpFetcher, MockFetcher};
pub use lifecycle::{ActivationReport, LifecycleState};
pub use notify::{ClickOutcome, NotificationClick, NotificationDispatcher, NotificationSink};
pub use queue::{Connectivity, DrainReport, DrainState, SyncQueueManager};
pub use router::{Routed, Served};
