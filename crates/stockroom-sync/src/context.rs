//! # Engine Context
//!
//! Everything the engine shares between handlers, created once at startup.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Arc<EngineContext>                                 │
//! │                                                                         │
//! │  config ─ names ─ lifecycle ─ connectivity                             │
//! │                                                                         │
//! │  ┌────────────┐ ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐ │
//! │  │ CacheStore │ │ OfflineStore │ │ SyncQueueMgr │ │ ClientRegistry   │ │
//! │  └────────────┘ └──────────────┘ └──────────────┘ └──────────────────┘ │
//! │  ┌────────────┐ ┌──────────────────────┐                               │
//! │  │  Fetcher   │ │ NotificationDispatch │                               │
//! │  └────────────┘ └──────────────────────┘                               │
//! │                                                                         │
//! │  handed to: router::route, broker::dispatch, server handlers            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tests build a fresh context per test from an in-memory database and a
//! [`MockFetcher`](crate::fetch::MockFetcher).

use std::sync::Arc;

use stockroom_core::{CacheNames, SyncDomain};
use stockroom_db::{Database, DbConfig, OfflineStore};
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::clients::ClientRegistry;
use crate::config::EngineConfig;
use crate::error::SyncResult;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::lifecycle::Lifecycle;
use crate::notify::{LogSink, NotificationDispatcher, NotificationSink};
use crate::queue::{Connectivity, DrainReport, SyncQueueManager};

pub struct EngineContext {
    pub config: EngineConfig,
    pub names: CacheNames,
    pub db: Database,
    pub offline: OfflineStore,
    pub cache: CacheStore,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: ClientRegistry,
    pub connectivity: Connectivity,
    pub queues: SyncQueueManager,
    pub notifications: NotificationDispatcher,
    pub lifecycle: Lifecycle,
}

impl EngineContext {
    /// Wires a context from its parts.
    pub fn new(
        config: EngineConfig,
        db: Database,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let clients = ClientRegistry::new();
        let connectivity = Connectivity::new(true);
        let notifications = NotificationDispatcher::new(sink, clients.clone());
        let queues = SyncQueueManager::new(
            db.sync_queue(),
            Arc::clone(&fetcher),
            clients.clone(),
            notifications.clone(),
            connectivity.clone(),
            config.sync.clone(),
        );

        Arc::new(EngineContext {
            names: config.cache_names(),
            cache: CacheStore::from_config(&config),
            offline: db.offline(),
            config,
            db,
            fetcher,
            clients,
            connectivity,
            queues,
            notifications,
            lifecycle: Lifecycle::default(),
        })
    }

    /// Opens the configured database and upstream.
    pub async fn open(config: EngineConfig) -> SyncResult<Arc<Self>> {
        let path = config.database_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::new(DbConfig::new(&path)).await?;
        let fetcher = HttpFetcher::new(config.upstream_url(), config.request_timeout())?;
        info!(
            upstream = %config.upstream_url(),
            database = %path.display(),
            "Engine context ready"
        );

        Ok(Self::new(config, db, Arc::new(fetcher), Arc::new(LogSink)))
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Records a connectivity change.
    ///
    /// Coming back online moves offline sales into the sales queue and
    /// drains every queue.
    ///
    /// ## Returns
    /// The drain reports when this call brought the engine online.
    pub async fn set_online(&self, online: bool) -> Vec<DrainReport> {
        match (self.connectivity.set(online), online) {
            (false, true) => info!("Connectivity restored"),
            (true, false) => {
                info!("Connectivity lost");
                return Vec::new();
            }
            _ => return Vec::new(),
        }

        if let Err(e) = self.queues.promote_pending_uploads(&self.offline).await {
            warn!(error = %e, "Failed to queue pending offline sales");
        }
        self.queues.drain_all().await
    }

    /// Drains the queue named by a sync tag (`sales-sync`, `stock`, ...).
    pub async fn on_sync_trigger(&self, tag: &str) -> SyncResult<DrainReport> {
        let domain = SyncDomain::from_tag(tag)?;
        Ok(self.queues.drain(domain).await)
    }
}
