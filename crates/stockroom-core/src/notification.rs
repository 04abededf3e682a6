//! # Push Notifications
//!
//! Maps inbound push payloads to displayable notifications, and user
//! interaction with a notification to an in-app route.
//!
//! ```text
//!   push bytes ──► PushPayload ──► Notification ──► (displayed)
//!                                                        │ click
//!                                                        ▼
//!                               resolve_route(data, action) ──► "/sales/invoices/42"
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::routing::SyncDomain;
use crate::types::id_text;

/// Icon used when a payload carries none.
pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";

/// Small monochrome badge.
pub const DEFAULT_BADGE: &str = "/icons/icon-72x72.png";

/// Title used when a payload carries none.
pub const DEFAULT_TITLE: &str = "Stockroom";

/// Route opened for payloads without a routable type.
pub const DEFAULT_ROUTE: &str = "/dashboard";

// =============================================================================
// Payload
// =============================================================================

/// Routing data attached to a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PushData {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "id_text::lenient::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,

    #[serde(
        default,
        deserialize_with = "id_text::lenient::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub product_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "id_text::lenient::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub invoice_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "id_text::lenient::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub po_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "id_text::lenient::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub barcode: Option<String>,
}

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NotificationAction {
    pub fn new(action: &str, title: &str) -> Self {
        NotificationAction {
            action: action.to_string(),
            title: title.to_string(),
            icon: None,
        }
    }
}

/// Inbound push payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default, deserialize_with = "routing_data")]
    pub data: PushData,

    #[serde(default)]
    pub actions: Option<Vec<NotificationAction>>,

    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub silent: bool,

    #[serde(default)]
    pub urgent: bool,
}

/// Unreadable `data` keeps the push and drops only its routing.
fn routing_data<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PushData, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl PushPayload {
    /// Parses raw push bytes. Anything that is not a JSON object is `None`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

// =============================================================================
// Notification
// =============================================================================

/// The notification to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: PushData,
    pub actions: Vec<NotificationAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    pub silent: bool,
    pub require_interaction: bool,
    pub vibrate: Vec<u32>,
}

impl Notification {
    /// Builds a notification from a push payload.
    ///
    /// Returns `None` for payloads without a body, which are ignored.
    pub fn from_push(payload: PushPayload) -> Option<Self> {
        let body = payload.body.filter(|b| !b.trim().is_empty())?;
        let kind = payload.data.kind.clone().unwrap_or_else(|| "dashboard".to_string());

        let actions = payload
            .actions
            .unwrap_or_else(|| default_actions(&kind));

        Some(Notification {
            title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body,
            icon: payload.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            badge: DEFAULT_BADGE.to_string(),
            tag: payload.tag.unwrap_or(kind),
            data: payload.data,
            actions,
            image: payload.image,
            silent: payload.silent,
            require_interaction: payload.urgent,
            vibrate: if payload.silent { Vec::new() } else { vec![200, 100, 200] },
        })
    }

    /// The notification shown after a queue drains completely.
    pub fn sync_completed(domain: SyncDomain, replayed: usize) -> Self {
        let noun = if replayed == 1 { "change" } else { "changes" };
        Notification {
            title: "Sync complete".to_string(),
            body: format!("{replayed} offline {} {noun} synced", domain.operation()),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_BADGE.to_string(),
            tag: format!("sync-{}", domain.as_str()),
            data: PushData {
                kind: Some("sync_completed".to_string()),
                ..PushData::default()
            },
            actions: Vec::new(),
            image: None,
            silent: true,
            require_interaction: false,
            vibrate: Vec::new(),
        }
    }
}

/// Actions offered for a push type when the payload brings none.
pub fn default_actions(kind: &str) -> Vec<NotificationAction> {
    match kind {
        "stock_low" => vec![
            NotificationAction::new("view", "View product"),
            NotificationAction::new("reorder", "Reorder"),
        ],
        "sales_completed" => vec![NotificationAction::new("view", "View invoice")],
        "purchase_received" => vec![NotificationAction::new("view", "View order")],
        _ => Vec::new(),
    }
}

// =============================================================================
// Click Routing
// =============================================================================

/// Resolves the in-app route for a click on a notification.
///
/// `action` is the clicked button, or `None` for the notification body.
/// Returns `None` when the click should only close the notification.
///
/// ## Example
/// ```rust
/// use stockroom_core::notification::{resolve_route, PushData};
///
/// let data = PushData {
///     kind: Some("stock_low".to_string()),
///     product_id: Some("P1".to_string()),
///     ..PushData::default()
/// };
/// assert_eq!(resolve_route(&data, None).as_deref(), Some("/inventory/products/P1"));
/// assert_eq!(
///     resolve_route(&data, Some("reorder")).as_deref(),
///     Some("/purchase/orders/new?product=P1")
/// );
/// assert_eq!(resolve_route(&data, Some("dismiss")), None);
/// ```
pub fn resolve_route(data: &PushData, action: Option<&str>) -> Option<String> {
    if matches!(action, Some("dismiss") | Some("close")) {
        return None;
    }

    let route = match data.kind.as_deref() {
        Some("stock_low") => match (action, data.product_id.as_deref()) {
            (Some("reorder"), Some(id)) => format!("/purchase/orders/new?product={id}"),
            (Some("reorder"), None) => "/purchase/orders/new".to_string(),
            (_, Some(id)) => format!("/inventory/products/{id}"),
            (_, None) => "/inventory/products".to_string(),
        },
        Some("sales_completed") => match data.invoice_id.as_deref() {
            Some(id) => format!("/sales/invoices/{id}"),
            None => "/sales/invoices".to_string(),
        },
        Some("purchase_received") => match data.po_id.as_deref() {
            Some(id) => format!("/purchase/orders/{id}"),
            None => "/purchase/orders".to_string(),
        },
        Some("barcode_scan_result") => match data.barcode.as_deref() {
            Some(code) => format!("/inventory/products?barcode={code}"),
            None => "/inventory/products".to_string(),
        },
        Some("sync_completed") => "/settings/sync".to_string(),
        _ => DEFAULT_ROUTE.to_string(),
    };

    Some(route)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(kind: &str) -> PushData {
        PushData {
            kind: Some(kind.to_string()),
            ..PushData::default()
        }
    }

    #[test]
    fn test_payload_without_body_is_ignored() {
        let payload = PushPayload::parse(br#"{"title": "Hi"}"#).unwrap();
        assert!(Notification::from_push(payload).is_none());
        assert!(PushPayload::parse(b"not json").is_none());
    }

    #[test]
    fn test_notification_defaults() {
        let payload = PushPayload::parse(
            br#"{"body": "Milk is low", "urgent": true, "data": {"type": "stock_low", "productId": "P9"}}"#,
        )
        .unwrap();
        let n = Notification::from_push(payload).unwrap();

        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.icon, DEFAULT_ICON);
        assert_eq!(n.tag, "stock_low");
        assert!(n.require_interaction);
        assert_eq!(n.actions.len(), 2);
        assert_eq!(n.data.product_id.as_deref(), Some("P9"));
    }

    #[test]
    fn test_numeric_ids_are_kept() {
        let payload = PushPayload::parse(
            br#"{"title": "Low", "body": "Milk is low", "data": {"type": "stock_low", "productId": 42}}"#,
        )
        .unwrap();
        assert_eq!(payload.data.product_id.as_deref(), Some("42"));

        let n = Notification::from_push(payload).unwrap();
        assert_eq!(resolve_route(&n.data, None).unwrap(), "/inventory/products/42");

        let payload = PushPayload::parse(br#"{"body": "x", "data": {"invoiceId": 7, "poId": 3.5, "barcode": 5000}}"#).unwrap();
        assert_eq!(payload.data.invoice_id.as_deref(), Some("7"));
        assert_eq!(payload.data.po_id.as_deref(), Some("3.5"));
        assert_eq!(payload.data.barcode.as_deref(), Some("5000"));
    }

    #[test]
    fn test_malformed_data_still_notifies() {
        let payload = PushPayload::parse(br#"{"body": "Hello", "data": "oops"}"#).unwrap();
        assert_eq!(payload.data, PushData::default());
        assert!(Notification::from_push(payload).is_some());

        let payload = PushPayload::parse(br#"{"body": "Hello", "data": {"productId": true}}"#).unwrap();
        assert!(payload.data.product_id.is_none());
    }

    #[test]
    fn test_explicit_actions_win() {
        let payload = PushPayload::parse(
            br#"{"body": "x", "data": {"type": "stock_low"}, "actions": []}"#,
        )
        .unwrap();
        assert!(Notification::from_push(payload).unwrap().actions.is_empty());
    }

    #[test]
    fn test_routes() {
        let mut d = data("sales_completed");
        d.invoice_id = Some("INV-7".to_string());
        assert_eq!(resolve_route(&d, None).unwrap(), "/sales/invoices/INV-7");
        assert_eq!(resolve_route(&d, Some("view")).unwrap(), "/sales/invoices/INV-7");

        let mut d = data("purchase_received");
        d.po_id = Some("PO-1".to_string());
        assert_eq!(resolve_route(&d, None).unwrap(), "/purchase/orders/PO-1");

        let mut d = data("barcode_scan_result");
        d.barcode = Some("0123".to_string());
        assert_eq!(resolve_route(&d, None).unwrap(), "/inventory/products?barcode=0123");

        assert_eq!(resolve_route(&data("sync_completed"), None).unwrap(), "/settings/sync");
        assert_eq!(resolve_route(&data("mystery"), None).unwrap(), DEFAULT_ROUTE);
        assert_eq!(resolve_route(&PushData::default(), None).unwrap(), DEFAULT_ROUTE);
    }

    #[test]
    fn test_sync_completed_notification() {
        let n = Notification::sync_completed(SyncDomain::Sales, 3);
        assert_eq!(n.body, "3 offline sales changes synced");
        assert_eq!(n.data.kind.as_deref(), Some("sync_completed"));
    }
}
