//! # Sync Queue Manager
//!
//! Replays mutations that failed while offline, one domain queue at a time.
//!
//! ## Drain State Machine (per queue)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌──────┐  drain()   ┌──────────┐  head replayed ok (status < 500)    │
//! │   │ IDLE │ ─────────► │ DRAINING │ ──────────────┐ remove(head),        │
//! │   └──────┘            └────┬─────┘ ◄─────────────┘ notify clients       │
//! │      ▲                     │                                            │
//! │      │  queue empty        │  transport error / 5xx                     │
//! │      └─────────────────────┤  head stays first (mark_failed)           │
//! │                            ▼                                            │
//! │                       ┌─────────┐   backoff re-drain while online      │
//! │                       │ BLOCKED │ ───────────────────────────► DRAINING │
//! │                       └─────────┘                                       │
//! │                                                                         │
//! │  One tokio Mutex per queue serializes drains of the same queue.        │
//! │  Different queues drain concurrently and never wait on each other.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: an entry is deleted only after the upstream
//! accepted it, so a crash between replay and delete resends it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stockroom_core::protocol::{QueueLengths, SyncStatusReport};
use stockroom_core::{ClientEvent, Collection, RecordQuery, RequestSnapshot, SyncDomain};
use stockroom_db::{OfflineStore, QueuedRequest, SyncQueueRepository};
use tracing::{debug, error, info, warn};

use crate::clients::ClientRegistry;
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::fetch::Fetcher;
use crate::notify::NotificationDispatcher;

// =============================================================================
// Connectivity
// =============================================================================

/// Shared online/offline flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Connectivity {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Sets the flag and returns the previous value.
    pub fn set(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

// =============================================================================
// Drain State
// =============================================================================

/// Where a queue is in its drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrainState {
    Idle,
    Draining,
    /// The head failed; later entries wait behind it.
    Blocked,
}

impl std::fmt::Display for DrainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainState::Idle => write!(f, "idle"),
            DrainState::Draining => write!(f, "draining"),
            DrainState::Blocked => write!(f, "blocked"),
        }
    }
}

/// Result of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub domain: SyncDomain,
    /// Entries replayed and removed in this pass.
    pub replayed: usize,
    /// Entries still queued afterwards.
    pub remaining: u64,
    /// `Idle` when the queue emptied, `Blocked` otherwise.
    pub state: DrainState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DrainReport {
    pub fn is_blocked(&self) -> bool {
        self.state == DrainState::Blocked
    }
}

struct QueueSlot {
    drain_lock: tokio::sync::Mutex<()>,
    state: parking_lot::Mutex<DrainState>,
    retrying: AtomicBool,
}

impl QueueSlot {
    fn new() -> Self {
        QueueSlot {
            drain_lock: tokio::sync::Mutex::new(()),
            state: parking_lot::Mutex::new(DrainState::Idle),
            retrying: AtomicBool::new(false),
        }
    }

    fn set(&self, state: DrainState) {
        *self.state.lock() = state;
    }
}

// =============================================================================
// Sync Queue Manager
// =============================================================================

struct ManagerInner {
    repo: SyncQueueRepository,
    fetcher: Arc<dyn Fetcher>,
    clients: ClientRegistry,
    notifier: NotificationDispatcher,
    connectivity: Connectivity,
    settings: SyncSettings,
    slots: HashMap<SyncDomain, QueueSlot>,
}

/// Owns the three domain queues. Clones share state.
#[derive(Clone)]
pub struct SyncQueueManager {
    inner: Arc<ManagerInner>,
}

impl SyncQueueManager {
    pub fn new(
        repo: SyncQueueRepository,
        fetcher: Arc<dyn Fetcher>,
        clients: ClientRegistry,
        notifier: NotificationDispatcher,
        connectivity: Connectivity,
        settings: SyncSettings,
    ) -> Self {
        let slots = SyncDomain::ALL
            .into_iter()
            .map(|domain| (domain, QueueSlot::new()))
            .collect();

        SyncQueueManager {
            inner: Arc::new(ManagerInner {
                repo,
                fetcher,
                clients,
                notifier,
                connectivity,
                settings,
                slots,
            }),
        }
    }

    fn slot(&self, domain: SyncDomain) -> &QueueSlot {
        // Every domain gets a slot in `new`.
        &self.inner.slots[&domain]
    }

    /// Current drain state of a queue.
    pub fn state(&self, domain: SyncDomain) -> DrainState {
        *self.slot(domain).state.lock()
    }

    /// Appends a captured request to the tail of `domain`'s queue.
    pub async fn enqueue(&self, domain: SyncDomain, request: &RequestSnapshot) -> SyncResult<QueuedRequest> {
        let entry = self.inner.repo.enqueue(domain.queue_name(), request).await?;
        info!(
            domain = %domain,
            id = entry.id,
            method = %request.method,
            url = %request.url,
            "Mutation queued for replay"
        );
        Ok(entry)
    }

    pub async fn len(&self, domain: SyncDomain) -> SyncResult<u64> {
        let len = self.inner.repo.len(domain.queue_name()).await?;
        Ok(u64::try_from(len).unwrap_or(0))
    }

    /// Queued entries in replay order.
    pub async fn entries(&self, domain: SyncDomain) -> SyncResult<Vec<QueuedRequest>> {
        Ok(self.inner.repo.list(domain.queue_name()).await?)
    }

    /// Drops every entry of a queue without replaying it.
    pub async fn clear(&self, domain: SyncDomain) -> SyncResult<u64> {
        let slot = self.slot(domain);
        let _guard = slot.drain_lock.lock().await;
        let removed = self.inner.repo.clear(domain.queue_name()).await?;
        slot.set(DrainState::Idle);
        warn!(domain = %domain, removed, "Sync queue cleared");
        Ok(removed)
    }

    // =========================================================================
    // Draining
    // =========================================================================

    /// Replays `domain`'s queue head-first until it is empty or a replay
    /// fails.
    ///
    /// Never fails: a failed pass is reported as `Blocked` and, while online,
    /// retried later with backoff.
    pub async fn drain(&self, domain: SyncDomain) -> DrainReport {
        let report = self.drain_pass(domain).await;
        if report.is_blocked() {
            self.schedule_retry(domain);
        }
        report
    }

    /// Drains every queue concurrently.
    pub async fn drain_all(&self) -> Vec<DrainReport> {
        join_all(SyncDomain::ALL.into_iter().map(|domain| self.drain(domain))).await
    }

    async fn drain_pass(&self, domain: SyncDomain) -> DrainReport {
        let slot = self.slot(domain);
        let _guard = slot.drain_lock.lock().await;
        slot.set(DrainState::Draining);

        let queue = domain.queue_name();
        let mut replayed = 0;

        let outcome: SyncResult<()> = loop {
            let entry = match self.inner.repo.peek(queue).await {
                Ok(Some(entry)) => entry,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            };

            if let Err(e) = self.replay(&entry).await {
                warn!(domain = %domain, id = entry.id, error = %e, "Replay failed, queue blocked");
                if let Err(mark_err) = self.inner.repo.mark_failed(entry.id, &e.to_string()).await {
                    error!(id = entry.id, error = %mark_err, "Failed to record replay failure");
                }
                break Err(e);
            }

            if let Err(e) = self.inner.repo.remove(entry.id).await {
                break Err(e.into());
            }
            if let Err(e) = self.inner.repo.record_success(queue).await {
                warn!(queue = %queue, error = %e, "Failed to record sync time");
            }
            replayed += 1;

            self.inner.clients.broadcast(ClientEvent::SyncReplayed {
                domain,
                method: entry.request.method.clone(),
                url: entry.request.url.clone(),
                entry_id: entry.id,
            });
        };

        let remaining = self.len(domain).await.unwrap_or_else(|e| {
            warn!(domain = %domain, error = %e, "Failed to read queue length");
            0
        });

        let (state, error) = match outcome {
            Ok(()) => (DrainState::Idle, None),
            Err(e) => (DrainState::Blocked, Some(e.to_string())),
        };
        slot.set(state);

        if replayed > 0 {
            info!(domain = %domain, replayed, remaining, state = %state, "Drain pass finished");
            if state == DrainState::Idle && remaining == 0 && self.inner.settings.notify_on_complete {
                self.inner.notifier.sync_completed(domain, replayed);
            }
        }

        DrainReport {
            domain,
            replayed,
            remaining,
            state,
            error,
        }
    }

    /// Sends one queued request. Status below 500 counts as delivered.
    async fn replay(&self, entry: &QueuedRequest) -> SyncResult<()> {
        let response = self.inner.fetcher.fetch(&entry.request).await?;
        if response.status >= 500 {
            return Err(SyncError::UpstreamStatus {
                status: response.status,
            });
        }
        debug!(id = entry.id, status = response.status, "Queued request replayed");
        Ok(())
    }

    fn schedule_retry(&self, domain: SyncDomain) {
        if !self.inner.settings.retry_blocked || !self.inner.connectivity.is_online() {
            return;
        }
        if self.slot(domain).retrying.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = self.clone();
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.inner.settings.initial_backoff_ms),
            max_interval: Duration::from_secs(self.inner.settings.max_backoff_secs),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        tokio::spawn(async move {
            while let Some(delay) = backoff.next_backoff() {
                tokio::time::sleep(delay).await;
                if !manager.inner.connectivity.is_online() {
                    debug!(domain = %domain, "Offline, retry loop stopped");
                    break;
                }
                let report = manager.drain_pass(domain).await;
                if !report.is_blocked() {
                    break;
                }
            }
            manager.slot(domain).retrying.store(false, Ordering::SeqCst);
        });
    }

    // =========================================================================
    // Status & Pending Uploads
    // =========================================================================

    /// Queue lengths and last sync time. Storage failures read as empty.
    pub async fn status(&self) -> SyncStatusReport {
        let mut queues = QueueLengths::default();
        for domain in SyncDomain::ALL {
            match self.len(domain).await {
                Ok(len) => queues.set(domain, len),
                Err(e) => warn!(domain = %domain, error = %e, "Failed to read queue length"),
            }
        }

        let last_sync = self.inner.repo.last_sync().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read last sync time");
            None
        });

        SyncStatusReport {
            total_pending: queues.total(),
            queues,
            last_sync,
            online: self.inner.connectivity.is_online(),
        }
    }

    /// Moves offline sales recorded in `pending_uploads` into the sales queue.
    ///
    /// ## Returns
    /// Number of sales enqueued.
    pub async fn promote_pending_uploads(&self, offline: &OfflineStore) -> SyncResult<usize> {
        let pending = offline
            .get_all(Collection::PendingUploads, &RecordQuery::by_index("type", "sale"))
            .await?;

        let mut promoted = 0;
        for upload in pending {
            let Some(upload_id) = upload.get("id").filter(|id| !id.is_null()) else {
                warn!(?upload, "Pending upload without id");
                continue;
            };

            let sale_key = upload.get("sale_id").cloned().unwrap_or(Value::Null);
            match offline.get_by_key(Collection::Sales, &sale_key).await? {
                Some(sale) => {
                    let request = RequestSnapshot::json("POST", &self.inner.settings.sales_endpoint, &sale);
                    self.enqueue(SyncDomain::Sales, &request).await?;
                    promoted += 1;
                }
                None => warn!(sale_id = %sale_key, "Pending upload refers to a missing sale"),
            }

            offline.delete_by_key(Collection::PendingUploads, upload_id).await?;
        }

        if promoted > 0 {
            info!(promoted, "Pending offline sales queued");
        }
        Ok(promoted)
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockFetcher;
    use crate::notify::MemorySink;
    use serde_json::json;
    use stockroom_core::HttpResponse;
    use stockroom_db::{Database, DbConfig};

    struct Harness {
        manager: SyncQueueManager,
        fetcher: Arc<MockFetcher>,
        sink: Arc<MemorySink>,
        clients: ClientRegistry,
        db: Database,
    }

    async fn harness() -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.offline().ensure_schema().await.unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let sink = Arc::new(MemorySink::new());
        let clients = ClientRegistry::new();
        let settings = SyncSettings {
            retry_blocked: false,
            ..SyncSettings::default()
        };

        let manager = SyncQueueManager::new(
            db.sync_queue(),
            fetcher.clone(),
            clients.clone(),
            NotificationDispatcher::new(sink.clone(), clients.clone()),
            Connectivity::new(true),
            settings,
        );

        Harness {
            manager,
            fetcher,
            sink,
            clients,
            db,
        }
    }

    fn sale(n: u32) -> RequestSnapshot {
        RequestSnapshot::json("POST", format!("/api/sales/{n}"), &json!({"n": n}))
    }

    #[tokio::test]
    async fn test_drain_in_enqueue_order() {
        let h = harness().await;
        for n in 1..=3 {
            h.manager.enqueue(SyncDomain::Sales, &sale(n)).await.unwrap();
            h.fetcher.respond("POST", &format!("/api/sales/{n}"), HttpResponse::new(201, ""));
        }

        let report = h.manager.drain(SyncDomain::Sales).await;
        assert_eq!(report.replayed, 3);
        assert_eq!(report.state, DrainState::Idle);

        let urls: Vec<String> = h.fetcher.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["/api/sales/1", "/api/sales/2", "/api/sales/3"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_drains_replay_each_entry_once() {
        let h = harness().await;
        for n in 1..=5 {
            h.manager.enqueue(SyncDomain::Sales, &sale(n)).await.unwrap();
            h.fetcher.respond("POST", &format!("/api/sales/{n}"), HttpResponse::new(201, ""));
        }

        let drains: Vec<_> = (0..2)
            .map(|_| {
                let manager = h.manager.clone();
                tokio::spawn(async move { manager.drain(SyncDomain::Sales).await })
            })
            .collect();
        let mut replayed = 0;
        for drain in drains {
            let report = drain.await.unwrap();
            assert_eq!(report.state, DrainState::Idle);
            replayed += report.replayed;
        }

        assert_eq!(replayed, 5);
        for n in 1..=5 {
            assert_eq!(h.fetcher.count("POST", &format!("/api/sales/{n}")), 1);
        }
        let urls: Vec<String> = h.fetcher.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, (1..=5).map(|n| format!("/api/sales/{n}")).collect::<Vec<_>>());
        assert_eq!(h.manager.len(SyncDomain::Sales).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_enqueue_during_drain_is_not_lost() {
        let h = harness().await;
        h.fetcher
            .respond("POST", "/api/sales/1", HttpResponse::new(201, ""))
            .respond("POST", "/api/sales/2", HttpResponse::new(201, ""));
        h.manager.enqueue(SyncDomain::Sales, &sale(1)).await.unwrap();

        let drain = {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.drain(SyncDomain::Sales).await })
        };
        h.manager.enqueue(SyncDomain::Sales, &sale(2)).await.unwrap();
        drain.await.unwrap();

        // the second entry was either replayed by that pass or still waits
        let left = h.manager.len(SyncDomain::Sales).await.unwrap();
        let sent = h.fetcher.count("POST", "/api/sales/2");
        assert_eq!(left as usize + sent, 1);
    }

    #[tokio::test]
    async fn test_failed_head_blocks_later_entries() {
        let h = harness().await;
        h.manager.enqueue(SyncDomain::Sales, &sale(1)).await.unwrap();
        h.manager.enqueue(SyncDomain::Sales, &sale(2)).await.unwrap();
        h.fetcher.respond("POST", "/api/sales/2", HttpResponse::new(201, ""));
        h.fetcher.respond("POST", "/api/sales/1", HttpResponse::new(503, ""));

        let report = h.manager.drain(SyncDomain::Sales).await;
        assert!(report.is_blocked());
        assert_eq!(report.remaining, 2);
        assert_eq!(h.fetcher.count("POST", "/api/sales/2"), 0);

        let entries = h.manager.entries(SyncDomain::Sales).await.unwrap();
        assert_eq!(entries[0].request.url, "/api/sales/1");
        assert_eq!(entries[0].attempts, 1);
        assert_eq!(h.manager.state(SyncDomain::Sales), DrainState::Blocked);
    }

    #[tokio::test]
    async fn test_client_errors_count_as_delivered() {
        let h = harness().await;
        h.manager.enqueue(SyncDomain::Stock, &RequestSnapshot::new("PUT", "/api/stock/P1")).await.unwrap();
        h.fetcher.respond("PUT", "/api/stock/P1", HttpResponse::new(409, ""));

        let report = h.manager.drain(SyncDomain::Stock).await;
        assert_eq!(report.replayed, 1);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn test_domains_are_independent() {
        let h = harness().await;
        h.manager.enqueue(SyncDomain::Sales, &sale(1)).await.unwrap();
        h.manager
            .enqueue(SyncDomain::Purchase, &RequestSnapshot::new("POST", "/api/purchase/orders"))
            .await
            .unwrap();
        h.fetcher.respond("POST", "/api/purchase/orders", HttpResponse::new(200, ""));

        let reports = h.manager.drain_all().await;
        let sales = reports.iter().find(|r| r.domain == SyncDomain::Sales).unwrap();
        let purchase = reports.iter().find(|r| r.domain == SyncDomain::Purchase).unwrap();
        assert!(sales.is_blocked());
        assert_eq!(purchase.replayed, 1);
        assert_eq!(purchase.state, DrainState::Idle);
    }

    #[tokio::test]
    async fn test_replay_notifies_clients_and_user() {
        let h = harness().await;
        let mut events = h.clients.subscribe();
        let entry = h.manager.enqueue(SyncDomain::Sales, &sale(1)).await.unwrap();
        h.fetcher.respond("POST", "/api/sales/1", HttpResponse::new(201, ""));

        h.manager.drain(SyncDomain::Sales).await;

        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::SyncReplayed {
                domain: SyncDomain::Sales,
                method: "POST".into(),
                url: "/api/sales/1".into(),
                entry_id: entry.id,
            }
        );
        assert_eq!(h.sink.shown().len(), 1);
    }

    #[tokio::test]
    async fn test_status_counts_queues() {
        let h = harness().await;
        h.manager.enqueue(SyncDomain::Sales, &sale(1)).await.unwrap();
        h.manager.enqueue(SyncDomain::Stock, &RequestSnapshot::new("PUT", "/api/stock/1")).await.unwrap();
        h.manager.enqueue(SyncDomain::Stock, &RequestSnapshot::new("PUT", "/api/stock/2")).await.unwrap();

        let status = h.manager.status().await;
        assert_eq!(status.queues.sales, 1);
        assert_eq!(status.queues.stock, 2);
        assert_eq!(status.total_pending, 3);
        assert!(status.last_sync.is_none());
        assert!(status.online);
    }

    #[tokio::test]
    async fn test_promote_pending_uploads() {
        let h = harness().await;
        let offline = h.db.offline();
        let sale_id = offline
            .put_one(Collection::Sales, &json!({"total": 10, "status": "offline"}))
            .await
            .unwrap();
        offline
            .put_one(
                Collection::PendingUploads,
                &json!({"type": "sale", "sale_id": sale_id, "timestamp": "2024-05-01T10:00:00Z"}),
            )
            .await
            .unwrap();

        assert_eq!(h.manager.promote_pending_uploads(&offline).await.unwrap(), 1);
        assert_eq!(offline.count(Collection::PendingUploads).await.unwrap(), 0);

        let queued = h.manager.entries(SyncDomain::Sales).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].request.url, "/api/sales");
    }

    #[tokio::test]
    async fn test_clear_resets_state() {
        let h = harness().await;
        h.manager.enqueue(SyncDomain::Sales, &sale(1)).await.unwrap();
        h.manager.drain(SyncDomain::Sales).await;

        assert_eq!(h.manager.clear(SyncDomain::Sales).await.unwrap(), 1);
        assert_eq!(h.manager.state(SyncDomain::Sales), DrainState::Idle);
    }
}
