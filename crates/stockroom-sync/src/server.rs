//! # Engine HTTP Server
//!
//! axum front of the engine. The foreground points its requests here.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET  /__engine/health               "OK" | 503 if SQLite is down       │
//! │  POST /__engine/message              command ──► CommandReply           │
//! │  POST /__engine/sync/{tag}           drain one queue ──► DrainReport    │
//! │  POST /__engine/connectivity         {online} ──► drain reports         │
//! │  POST /__engine/push                 push bytes ──► Notification | 204  │
//! │  POST /__engine/notification-click   {data, action} ──► ClickOutcome    │
//! │  GET  /__engine/clients              WebSocket: register + events       │
//! │  *                                   Request Router                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Client WebSocket
//! ```text
//! connect /__engine/clients?url=/sales
//!   ◄── {"type":"REGISTERED","data":{"client_id":"..."}}
//!   ◄── every ClientEvent (SYNC_REPLAYED, CONTROLLER_CHANGED, FOCUS, ...)
//!   ──► {"type":"CLIENT_STATE","data":{"url":"/x","focused":true}}
//!   ──► any engine command, optionally with "id"
//!   ◄── {"type":"REPLY","id":...,"data":CommandReply}
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use stockroom_core::{FetchRequest, HttpResponse, RequestDestination, RequestSnapshot};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker;
use crate::context::EngineContext;
use crate::error::{SyncError, SyncResult};
use crate::notify::NotificationClick;
use crate::router::{self, Routed};

/// Largest request body the router accepts.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Maximum WebSocket message size (1MB).
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Response header naming how the router served a request.
pub const SERVED_HEADER: &str = "x-stockroom-served";

// =============================================================================
// Engine Server
// =============================================================================

/// Handle for a running server.
pub struct EngineHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    server: JoinHandle<()>,
}

impl EngineHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the server to finish.
    pub async fn shutdown(self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Server shutdown channel closed".into()))?;
        self.server
            .await
            .map_err(|e| SyncError::ServerFailed(e.to_string()))
    }
}

/// Builds the axum application.
pub fn app(ctx: Arc<EngineContext>) -> Router {
    Router::new()
        .route("/__engine/health", get(health_handler))
        .route("/__engine/message", post(message_handler))
        .route("/__engine/sync/{tag}", post(sync_handler))
        .route("/__engine/connectivity", post(connectivity_handler))
        .route("/__engine/push", post(push_handler))
        .route("/__engine/notification-click", post(click_handler))
        .route("/__engine/clients", get(ws_handler))
        .fallback(intercept_handler)
        .with_state(ctx)
}

/// Binds `addr` and serves the engine in the background.
pub async fn start(ctx: Arc<EngineContext>, addr: SocketAddr) -> SyncResult<EngineHandle> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SyncError::ServerFailed(format!("Failed to bind to {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| SyncError::ServerFailed(e.to_string()))?;

    info!(addr = %local_addr, "Engine server started");

    let app = app(ctx);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Engine server shutting down");
            })
            .await
        {
            error!(error = %e, "Engine server stopped with error");
        }
    });

    Ok(EngineHandle {
        local_addr,
        shutdown_tx,
        server,
    })
}

// =============================================================================
// Engine Endpoints
// =============================================================================

async fn health_handler(State(ctx): State<Arc<EngineContext>>) -> Response {
    if ctx.db.health_check().await {
        "OK".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DATABASE UNAVAILABLE").into_response()
    }
}

async fn message_handler(State(ctx): State<Arc<EngineContext>>, Json(message): Json<Value>) -> impl IntoResponse {
    Json(broker::request(&ctx, message).await)
}

async fn sync_handler(State(ctx): State<Arc<EngineContext>>, Path(tag): Path<String>) -> Response {
    match ctx.on_sync_trigger(&tag).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "success": false, "message": e.to_string() }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ConnectivityChange {
    online: bool,
}

async fn connectivity_handler(
    State(ctx): State<Arc<EngineContext>>,
    Json(change): Json<ConnectivityChange>,
) -> impl IntoResponse {
    let reports = ctx.set_online(change.online).await;
    Json(json!({ "online": ctx.is_online(), "drained": reports }))
}

async fn push_handler(State(ctx): State<Arc<EngineContext>>, body: Bytes) -> Response {
    match ctx.notifications.handle_push(&body) {
        Some(notification) => Json(notification).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn click_handler(
    State(ctx): State<Arc<EngineContext>>,
    Json(click): Json<NotificationClick>,
) -> impl IntoResponse {
    Json(ctx.notifications.handle_click(&click))
}

// =============================================================================
// Intercepted Requests
// =============================================================================

/// Everything outside `/__engine` goes through the request router.
async fn intercept_handler(State(ctx): State<Arc<EngineContext>>, request: Request) -> Response {
    let fetch = match to_fetch_request(request).await {
        Ok(fetch) => fetch,
        Err(e) => {
            warn!(error = %e, "Unreadable request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response();
        }
    };

    into_response(router::route(&ctx, fetch).await)
}

async fn to_fetch_request(request: Request) -> SyncResult<FetchRequest> {
    let (parts, body) = request.into_parts();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let headers: BTreeMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();

    let bytes = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| SyncError::Internal(format!("body: {e}")))?;

    let destination = header_str(&parts.headers, "sec-fetch-dest")
        .map(RequestDestination::from_fetch_dest)
        .unwrap_or_default();
    let navigate = header_str(&parts.headers, "sec-fetch-mode") == Some("navigate");

    let mut snapshot = RequestSnapshot::new(parts.method.as_str(), url);
    snapshot.headers = headers;
    snapshot.body = (!bytes.is_empty()).then(|| bytes.to_vec());

    Ok(FetchRequest {
        request: snapshot,
        destination,
        navigate,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn into_response(routed: Routed) -> Response {
    let Routed { response, served } = routed;
    let HttpResponse {
        status,
        headers,
        body,
    } = response;

    let mut builder = Response::builder().status(status).header(SERVED_HEADER, served.as_str());
    for (name, value) in &headers {
        if name == header::CONTENT_LENGTH.as_str() || name == header::TRANSFER_ENCODING.as_str() {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(Body::from(body)).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build routed response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

// =============================================================================
// Client WebSocket
// =============================================================================

#[derive(Debug, Deserialize)]
struct ClientQuery {
    #[serde(default = "default_client_url")]
    url: String,
}

fn default_client_url() -> String {
    "/".to_string()
}

#[derive(Debug, Deserialize)]
struct ClientState {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    focused: Option<bool>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<EngineContext>>,
    Query(query): Query<ClientQuery>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, ctx, query.url))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<EngineContext>, url: String) {
    let (mut sender, mut receiver) = socket.split();

    let client = ctx.clients.register(url);
    let client_id = client.id.clone();
    info!(client_id = %client_id, url = %client.url, "Client connected");

    // Subscribe before announcing so no event falls in between.
    let mut events = ctx.clients.subscribe();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(64);

    let registered = json!({ "type": "REGISTERED", "data": { "client_id": client_id } });
    if sender.send(Message::Text(registered.to_string().into())).await.is_err() {
        ctx.clients.unregister(&client_id);
        return;
    }

    let outgoing_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let events_tx = outgoing_tx.clone();
    let events_client = client_id.clone();
    let events_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Ok(json) = event.to_json() else {
                        continue;
                    };
                    if events_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id = %events_client, skipped, "Client event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(reply) = handle_client_text(&ctx, &client_id, text.as_str()).await {
                    if outgoing_tx.send(Message::Text(reply.into())).await.is_err() {
                        break;
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = outgoing_tx.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(client_id = %client_id, "Client closed");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    events_handle.abort();
    outgoing_handle.abort();
    ctx.clients.unregister(&client_id);
    info!(client_id = %client_id, "Client disconnected");
}

/// Handles one text frame. Returns the frame to send back, if any.
async fn handle_client_text(ctx: &Arc<EngineContext>, client_id: &str, text: &str) -> Option<String> {
    let message: Value = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(client_id = %client_id, error = %e, "Ignoring frame that is not JSON");
            return None;
        }
    };

    if message.get("type").and_then(Value::as_str) == Some("CLIENT_STATE") {
        let state: ClientState = serde_json::from_value(message.get("data").cloned().unwrap_or(Value::Null)).ok()?;
        ctx.clients.update(client_id, state.url, state.focused);
        return None;
    }

    let id = message.get("id").cloned().unwrap_or(Value::Null);
    let reply = broker::request(ctx, message).await;
    Some(json!({ "type": "REPLY", "id": id, "data": reply }).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fetch::MockFetcher;
    use crate::notify::NoOpSink;
    use stockroom_db::{Database, DbConfig};

    async fn running() -> (EngineHandle, Arc<MockFetcher>) {
        let mut config = EngineConfig::default();
        config.app.shell = vec!["/".into()];
        config.sync.retry_blocked = false;
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("GET", "/", HttpResponse::html(200, "home"));

        let ctx = EngineContext::new(config, db, fetcher.clone(), Arc::new(NoOpSink));
        ctx.install().await.unwrap();
        ctx.activate().await.unwrap();

        let handle = start(ctx, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        (handle, fetcher)
    }

    #[tokio::test]
    async fn test_health_and_message() {
        let (handle, _) = running().await;
        let base = format!("http://{}", handle.local_addr());
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let health = client.get(format!("{base}/__engine/health")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");

        let reply: Value = client
            .post(format!("{base}/__engine/message"))
            .json(&json!({"type": "SYNC_STATUS"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reply["success"], true);
        assert_eq!(reply["data"]["total_pending"], 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_intercepted_request_reports_strategy() {
        let (handle, _) = running().await;
        let base = format!("http://{}", handle.local_addr());
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let queued = client
            .post(format!("{base}/api/sales"))
            .json(&json!({"total": 3}))
            .send()
            .await
            .unwrap();
        assert_eq!(queued.status().as_u16(), 202);
        assert_eq!(queued.headers()[SERVED_HEADER], "queued");

        let push = client
            .post(format!("{base}/__engine/push"))
            .body(r#"{"title":"x"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(push.status().as_u16(), 204);

        handle.shutdown().await.unwrap();
    }
}
