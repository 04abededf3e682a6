//! # Lifecycle Controller
//!
//! Install and activation of the engine.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌──────┐ install() ┌────────────┐  shell cached,   ┌───────────┐      │
//! │  │ IDLE │ ────────► │ INSTALLING │ ───────────────► │ INSTALLED │      │
//! │  └──────┘           └─────┬──────┘  schema ready    └─────┬─────┘      │
//! │     ▲                     │                               │            │
//! │     │ install() again     │ any step failed               │ activate() │
//! │  ┌──┴─────┐               │                               │ or         │
//! │  │ FAILED │ ◄─────────────┘                               │ SKIP_WAIT  │
//! │  └────────┘                                               ▼            │
//! │                     ┌────────┐   stale caches deleted, ┌────────────┐  │
//! │                     │ ACTIVE │ ◄────────────────────── │ ACTIVATING │  │
//! │                     └────────┘   clients claimed       └────────────┘  │
//! │                                                                         │
//! │  Only ACTIVE routes through the caching strategies. Before that every  │
//! │  request goes straight to the network.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stockroom_core::{CacheKind, RequestSnapshot};
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::error::{SyncError, SyncResult};

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Idle,
    Installing,
    Installed,
    Activating,
    Active,
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "idle"),
            LifecycleState::Installing => write!(f, "installing"),
            LifecycleState::Installed => write!(f, "installed"),
            LifecycleState::Activating => write!(f, "activating"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}

/// Current lifecycle state, changed only through checked transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle {
            state: RwLock::new(LifecycleState::Idle),
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    /// Moves to `to` if the current state is one of `from`.
    fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> SyncResult<()> {
        let mut state = self.state.write();
        if !from.contains(&*state) {
            return Err(SyncError::InvalidState {
                expected: from
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" or "),
                actual: state.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    fn set(&self, to: LifecycleState) {
        *self.state.write() = to;
    }
}

/// What activation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub deleted_caches: Vec<String>,
    pub claimed_clients: usize,
}

impl EngineContext {
    /// Precaches the app shell and prepares the offline schema.
    ///
    /// Either step failing aborts installation: the state becomes `Failed`
    /// and the error is returned.
    ///
    /// ## Returns
    /// Number of shell resources cached.
    pub async fn install(&self) -> SyncResult<usize> {
        self.lifecycle
            .transition(&[LifecycleState::Idle, LifecycleState::Failed], LifecycleState::Installing)?;
        info!(version = %self.names.version(), "Installing engine");

        match self.run_install().await {
            Ok(cached) => {
                self.lifecycle.set(LifecycleState::Installed);
                info!(cached, "Engine installed");
                Ok(cached)
            }
            Err(e) => {
                self.lifecycle.set(LifecycleState::Failed);
                error!(error = %e, "Install aborted");
                Err(e)
            }
        }
    }

    async fn run_install(&self) -> SyncResult<usize> {
        let shell = &self.config.app.shell;
        let fetched = join_all(shell.iter().map(|path| async move {
            let request = RequestSnapshot::get(path.as_str());
            match self.fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => Ok((request.cache_key(), response)),
                Ok(response) => Err(SyncError::InstallFailed(format!(
                    "{path} answered {}",
                    response.status
                ))),
                Err(e) => Err(SyncError::InstallFailed(format!("{path}: {e}"))),
            }
        }))
        .await
        .into_iter()
        .collect::<SyncResult<Vec<_>>>()?;

        let version = self
            .offline
            .ensure_schema()
            .await
            .map_err(|e| SyncError::InstallFailed(format!("offline schema: {e}")))?;
        info!(schema_version = version, "Offline schema ready");

        // Shell is written only once everything succeeded.
        let static_cache = self.names.name(CacheKind::Static);
        let cached = fetched.len();
        for (key, response) in fetched {
            self.cache.put(&static_cache, &key, response);
        }
        Ok(cached)
    }

    /// Deletes caches of older versions and takes control of every client.
    pub async fn activate(&self) -> SyncResult<ActivationReport> {
        self.lifecycle
            .transition(&[LifecycleState::Installed], LifecycleState::Activating)?;

        let deleted_caches = self.cache.delete_stale(&self.names);
        for name in &deleted_caches {
            info!(cache = %name, "Deleted stale cache");
        }

        let claimed_clients = self.clients.claim(self.names.version());
        self.lifecycle.set(LifecycleState::Active);
        info!(version = %self.names.version(), claimed_clients, "Engine active");

        if self.config.sync.drain_on_start && self.connectivity.is_online() {
            let queues = self.queues.clone();
            tokio::spawn(async move {
                queues.drain_all().await;
            });
        }

        Ok(ActivationReport {
            deleted_caches,
            claimed_clients,
        })
    }

    /// Activates an installed engine right away.
    ///
    /// ## Returns
    /// * `Ok(Some(report))` - Activation happened now
    /// * `Ok(None)` - Already active
    pub async fn skip_waiting(&self) -> SyncResult<Option<ActivationReport>> {
        match self.lifecycle.state() {
            LifecycleState::Active => Ok(None),
            LifecycleState::Installed => self.activate().await.map(Some),
            other => {
                warn!(state = %other, "SKIP_WAITING before install finished");
                Err(SyncError::InvalidState {
                    expected: LifecycleState::Installed.to_string(),
                    actual: other.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fetch::MockFetcher;
    use crate::notify::NoOpSink;
    use std::sync::Arc;
    use stockroom_core::HttpResponse;
    use stockroom_db::{Database, DbConfig};

    async fn context(shell: &[&str]) -> (Arc<EngineContext>, Arc<MockFetcher>) {
        let mut config = EngineConfig::default();
        config.app.shell = shell.iter().map(|s| s.to_string()).collect();
        config.app.version = "v2".into();

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        for path in shell {
            fetcher.respond("GET", path, HttpResponse::new(200, format!("shell {path}")));
        }
        (EngineContext::new(config, db, fetcher.clone(), Arc::new(NoOpSink)), fetcher)
    }

    #[test]
    fn test_transition_checks_current_state() {
        let lifecycle = Lifecycle::default();
        assert!(lifecycle
            .transition(&[LifecycleState::Installed], LifecycleState::Activating)
            .is_err());
        assert!(lifecycle
            .transition(&[LifecycleState::Idle], LifecycleState::Installing)
            .is_ok());
        assert_eq!(lifecycle.state(), LifecycleState::Installing);
    }

    #[tokio::test]
    async fn test_install_caches_shell() {
        let (ctx, _) = context(&["/", "/offline.html"]).await;

        assert_eq!(ctx.install().await.unwrap(), 2);
        assert_eq!(ctx.lifecycle.state(), LifecycleState::Installed);
        assert_eq!(ctx.cache.len("stockroom-static-v2"), 2);
        assert!(ctx.cache.get("stockroom-static-v2", "GET /offline.html").is_some());
    }

    #[tokio::test]
    async fn test_install_failure_aborts_and_caches_nothing() {
        let (ctx, fetcher) = context(&["/", "/offline.html"]).await;
        fetcher.respond("GET", "/offline.html", HttpResponse::new(404, ""));

        let err = ctx.install().await.unwrap_err();
        assert!(matches!(err, SyncError::InstallFailed(_)));
        assert_eq!(ctx.lifecycle.state(), LifecycleState::Failed);
        assert!(!ctx.cache.has_cache("stockroom-static-v2"));

        fetcher.respond("GET", "/offline.html", HttpResponse::new(200, "offline"));
        assert!(ctx.install().await.is_ok());
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let (ctx, _) = context(&["/"]).await;
        assert!(ctx.activate().await.is_err());
        assert!(ctx.skip_waiting().await.is_err());

        ctx.install().await.unwrap();
        let report = ctx.skip_waiting().await.unwrap().unwrap();
        assert!(report.deleted_caches.is_empty());
        assert!(ctx.lifecycle.is_active());
        assert_eq!(ctx.skip_waiting().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_activate_claims_open_clients() {
        let (ctx, _) = context(&["/"]).await;
        let client = ctx.clients.register("/sales");
        ctx.install().await.unwrap();

        let report = ctx.activate().await.unwrap();
        assert_eq!(report.claimed_clients, 1);
        assert!(ctx.clients.get(&client.id).unwrap().controlled);
    }
}
