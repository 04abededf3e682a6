//! # Client Registry
//!
//! Tracks the open application instances and fans engine events out to them.
//!
//! ```text
//! ┌──────────────┐  register(url)   ┌──────────────────────────────────────┐
//! │ app window A │ ───────────────► │            ClientRegistry            │
//! └──────────────┘                  │                                      │
//! ┌──────────────┐                  │  clients: id ──► Client              │
//! │ app window B │ ───────────────► │  events:  broadcast::Sender<Event>   │
//! └──────────────┘                  └───────────────┬──────────────────────┘
//!        ▲                                          │
//!        └────────── SYNC_REPLAYED / FOCUS / ... ───┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stockroom_core::{url_path, ClientEvent};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Capacity of the event channel. Slow clients lag and skip events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An open application instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    /// URL currently shown.
    pub url: String,
    pub focused: bool,
    /// True once the active engine has taken control of it.
    pub controlled: bool,
}

#[derive(Debug)]
struct RegistryInner {
    clients: RwLock<HashMap<String, Client>>,
    events: broadcast::Sender<ClientEvent>,
}

/// Shared registry of open clients. Clones share state.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        ClientRegistry {
            inner: Arc::new(RegistryInner {
                clients: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Registers a newly opened instance. It starts uncontrolled.
    pub fn register(&self, url: impl Into<String>) -> Client {
        let client = Client {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            focused: false,
            controlled: false,
        };
        self.inner
            .clients
            .write()
            .insert(client.id.clone(), client.clone());
        debug!(client_id = %client.id, url = %client.url, "Client registered");
        client
    }

    pub fn unregister(&self, client_id: &str) -> bool {
        let removed = self.inner.clients.write().remove(client_id).is_some();
        if removed {
            debug!(client_id = %client_id, "Client unregistered");
        }
        removed
    }

    /// Records where a client is and whether it has focus.
    pub fn update(&self, client_id: &str, url: Option<String>, focused: Option<bool>) -> bool {
        let mut clients = self.inner.clients.write();
        let Some(client) = clients.get_mut(client_id) else {
            return false;
        };
        if let Some(url) = url {
            client.url = url;
        }
        if let Some(focused) = focused {
            client.focused = focused;
        }
        true
    }

    pub fn get(&self, client_id: &str) -> Option<Client> {
        self.inner.clients.read().get(client_id).cloned()
    }

    /// All clients, ordered by id.
    pub fn list(&self) -> Vec<Client> {
        let mut clients: Vec<Client> = self.inner.clients.read().values().cloned().collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    pub fn len(&self) -> usize {
        self.inner.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Sends an event to every subscriber.
    ///
    /// ## Returns
    /// Number of subscribers reached. Zero is not an error.
    pub fn broadcast(&self, event: ClientEvent) -> usize {
        self.inner.events.send(event).unwrap_or(0)
    }

    /// Takes control of every open client.
    ///
    /// ## Returns
    /// Number of clients that were not controlled before.
    pub fn claim(&self, version: &str) -> usize {
        let newly: Vec<String> = {
            let mut clients = self.inner.clients.write();
            clients
                .values_mut()
                .filter(|client| !client.controlled)
                .map(|client| {
                    client.controlled = true;
                    client.id.clone()
                })
                .collect()
        };

        for client_id in &newly {
            self.broadcast(ClientEvent::ControllerChanged {
                client_id: client_id.clone(),
                version: version.to_string(),
            });
        }

        info!(claimed = newly.len(), version = %version, "Clients claimed");
        newly.len()
    }

    /// Shows `route`, preferring a client that is already there.
    ///
    /// ## Returns
    /// The event sent: `Focus` for an existing client whose path matches,
    /// `OpenWindow` otherwise.
    pub fn focus_or_open(&self, route: &str) -> ClientEvent {
        let target = url_path(route);
        let existing = {
            let mut clients = self.inner.clients.write();
            let mut matching: Vec<&mut Client> = clients
                .values_mut()
                .filter(|client| url_path(&client.url) == target)
                .collect();
            matching.sort_by(|a, b| b.focused.cmp(&a.focused).then_with(|| a.id.cmp(&b.id)));
            matching.into_iter().next().map(|client| {
                client.focused = true;
                client.id.clone()
            })
        };

        let event = match existing {
            Some(client_id) => ClientEvent::Focus {
                client_id,
                url: route.to_string(),
            },
            None => ClientEvent::OpenWindow {
                url: route.to_string(),
            },
        };
        self.broadcast(event.clone());
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_update_unregister() {
        let registry = ClientRegistry::new();
        let client = registry.register("/sales");

        assert!(registry.update(&client.id, Some("/inventory".into()), Some(true)));
        let stored = registry.get(&client.id).unwrap();
        assert_eq!(stored.url, "/inventory");
        assert!(stored.focused);

        assert!(registry.unregister(&client.id));
        assert!(registry.is_empty());
        assert!(!registry.update(&client.id, None, None));
    }

    #[tokio::test]
    async fn test_claim_marks_and_announces() {
        let registry = ClientRegistry::new();
        let mut events = registry.subscribe();
        let a = registry.register("/");
        registry.register("/sales");

        assert_eq!(registry.claim("v2"), 2);
        assert_eq!(registry.claim("v2"), 0);
        assert!(registry.list().iter().all(|c| c.controlled));

        let mut announced = Vec::new();
        for _ in 0..2 {
            if let ClientEvent::ControllerChanged { client_id, version } = events.recv().await.unwrap() {
                assert_eq!(version, "v2");
                announced.push(client_id);
            }
        }
        assert!(announced.contains(&a.id));
    }

    #[test]
    fn test_focus_existing_before_opening() {
        let registry = ClientRegistry::new();
        let client = registry.register("/inventory/products/P1?tab=stock");

        match registry.focus_or_open("/inventory/products/P1") {
            ClientEvent::Focus { client_id, .. } => assert_eq!(client_id, client.id),
            other => panic!("expected focus, got {other:?}"),
        }
        assert!(registry.get(&client.id).unwrap().focused);

        assert_eq!(
            registry.focus_or_open("/sales/invoices/9"),
            ClientEvent::OpenWindow {
                url: "/sales/invoices/9".into()
            }
        );
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.broadcast(ClientEvent::OpenWindow { url: "/".into() }), 0);
    }
}
