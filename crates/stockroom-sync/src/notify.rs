//! # Notification Dispatcher
//!
//! Push payloads in, notifications out, clicks routed back into the app.
//!
//! ```text
//! push bytes ──► PushPayload::parse ──► Notification::from_push ──► sink.show()
//!                     │ not JSON               │ no body
//!                     └──────── ignored ◄──────┘
//!
//! click(data, action) ──► resolve_route ──► ClientRegistry::focus_or_open
//!                             │ dismiss            ├─► Focus (existing view)
//!                             └─► Dismissed        └─► OpenWindow
//!
//! queue drained ──► Notification::sync_completed ──► sink.show()
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stockroom_core::notification::{resolve_route, Notification, PushData, PushPayload};
use stockroom_core::{ClientEvent, SyncDomain};
use tracing::{debug, info};

use crate::clients::ClientRegistry;

// =============================================================================
// Sinks
// =============================================================================

/// Displays notifications. The binary logs them; embedders forward them to
/// the platform.
pub trait NotificationSink: Send + Sync {
    fn show(&self, notification: &Notification);
}

/// No-op sink for when display is handled elsewhere.
pub struct NoOpSink;

impl NotificationSink for NoOpSink {
    fn show(&self, _notification: &Notification) {}
}

/// Sink that writes each notification to the log.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn show(&self, notification: &Notification) {
        info!(title = %notification.title, body = %notification.body, tag = %notification.tag, "Notification");
    }
}

/// Sink that keeps every notification it was given.
#[derive(Default)]
pub struct MemorySink {
    shown: Mutex<Vec<Notification>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().clone()
    }
}

impl NotificationSink for MemorySink {
    fn show(&self, notification: &Notification) {
        self.shown.lock().push(notification.clone());
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Body of a notification click.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationClick {
    #[serde(default)]
    pub data: PushData,

    /// Clicked action button; absent for a click on the body.
    #[serde(default)]
    pub action: Option<String>,
}

/// What a click did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    /// The notification was only closed.
    Dismissed,
    /// An existing client was brought to the front.
    Focused { client_id: String, url: String },
    /// A new window was requested.
    Opened { url: String },
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    clients: ClientRegistry,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, clients: ClientRegistry) -> Self {
        NotificationDispatcher { sink, clients }
    }

    /// Handles an inbound push.
    ///
    /// ## Returns
    /// The displayed notification, or `None` when the payload was ignored.
    pub fn handle_push(&self, bytes: &[u8]) -> Option<Notification> {
        let Some(payload) = PushPayload::parse(bytes) else {
            debug!(len = bytes.len(), "Ignoring push that is not a JSON object");
            return None;
        };
        let Some(notification) = Notification::from_push(payload) else {
            debug!("Ignoring push without a body");
            return None;
        };

        self.sink.show(&notification);
        Some(notification)
    }

    /// Routes a click to a view.
    pub fn handle_click(&self, click: &NotificationClick) -> ClickOutcome {
        let Some(route) = resolve_route(&click.data, click.action.as_deref()) else {
            return ClickOutcome::Dismissed;
        };

        match self.clients.focus_or_open(&route) {
            ClientEvent::Focus { client_id, url } => ClickOutcome::Focused { client_id, url },
            _ => ClickOutcome::Opened { url: route },
        }
    }

    /// Announces a completed drain.
    pub fn sync_completed(&self, domain: SyncDomain, replayed: usize) -> Notification {
        let notification = Notification::sync_completed(domain, replayed);
        self.sink.show(&notification);
        notification
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> (NotificationDispatcher, Arc<MemorySink>, ClientRegistry) {
        let sink = Arc::new(MemorySink::new());
        let clients = ClientRegistry::new();
        (NotificationDispatcher::new(sink.clone(), clients.clone()), sink, clients)
    }

    #[test]
    fn test_push_displayed() {
        let (dispatcher, sink, _) = dispatcher();
        let shown = dispatcher
            .handle_push(br#"{"title":"Low stock","body":"Milk is low","data":{"type":"stock_low","productId":"P1"}}"#)
            .unwrap();

        assert_eq!(shown.actions.len(), 2);
        assert_eq!(sink.shown(), vec![shown]);
    }

    #[test]
    fn test_malformed_push_ignored() {
        let (dispatcher, sink, _) = dispatcher();
        assert!(dispatcher.handle_push(b"not json").is_none());
        assert!(dispatcher.handle_push(br#"{"title":"No body"}"#).is_none());
        assert!(sink.shown().is_empty());
    }

    #[test]
    fn test_click_prefers_open_view() {
        let (dispatcher, _, clients) = dispatcher();
        let open = clients.register("/sales/invoices/INV-7");

        let click = NotificationClick {
            data: PushData {
                kind: Some("sales_completed".into()),
                invoice_id: Some("INV-7".into()),
                ..PushData::default()
            },
            action: None,
        };
        assert_eq!(
            dispatcher.handle_click(&click),
            ClickOutcome::Focused {
                client_id: open.id,
                url: "/sales/invoices/INV-7".into()
            }
        );

        let dismiss = NotificationClick {
            action: Some("dismiss".into()),
            ..click
        };
        assert_eq!(dispatcher.handle_click(&dismiss), ClickOutcome::Dismissed);
    }

    #[test]
    fn test_click_without_view_opens_window() {
        let (dispatcher, _, _) = dispatcher();
        let click = NotificationClick::default();
        assert_eq!(
            dispatcher.handle_click(&click),
            ClickOutcome::Opened {
                url: "/dashboard".into()
            }
        );
    }

    #[test]
    fn test_sync_completed_shown() {
        let (dispatcher, sink, _) = dispatcher();
        dispatcher.sync_completed(SyncDomain::Stock, 3);
        assert_eq!(sink.shown()[0].body, "3 offline inventory changes synced");
    }
}
