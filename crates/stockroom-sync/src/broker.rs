//! # Message Broker
//!
//! Executes foreground commands, each as its own task, each with its own
//! reply channel.
//!
//! ```text
//! ┌────────────┐  {type, data}   ┌──────────────┐ spawn ┌───────────────────┐
//! │ foreground │ ──────────────► │  dispatch()  │ ────► │ execute(command)  │
//! └────────────┘                 └──────┬───────┘       └─────────┬─────────┘
//!       ▲                               │ oneshot::Receiver       │ send once
//!       └──────── CommandReply ◄────────┴─────────────────────────┘
//! ```
//!
//! A reply channel belongs to exactly one call, so concurrent commands can
//! never receive each other's replies.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use stockroom_core::protocol::{BarcodeScanRequest, CachedDataRequest, ClearCacheRequest};
use stockroom_core::{
    CacheKind, Collection, CommandReply, CoreError, EngineCommand, ErrorCode, RequestSnapshot, SyncDomain,
};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{SyncError, SyncResult};

/// Starts a command and returns the channel its reply arrives on.
pub fn dispatch(ctx: &Arc<EngineContext>, message: Value) -> oneshot::Receiver<CommandReply> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let ctx = Arc::clone(ctx);

    tokio::spawn(async move {
        let reply = handle_message(&ctx, message).await;
        if reply_tx.send(reply).is_err() {
            debug!("Caller stopped waiting for reply");
        }
    });

    reply_rx
}

/// Dispatches a command and waits for its reply.
pub async fn request(ctx: &Arc<EngineContext>, message: Value) -> CommandReply {
    match dispatch(ctx, message).await {
        Ok(reply) => reply,
        Err(_) => CommandReply::error(ErrorCode::Internal, "Command task ended without replying"),
    }
}

/// Parses and executes one raw message.
pub async fn handle_message(ctx: &EngineContext, message: Value) -> CommandReply {
    let command = match EngineCommand::parse(message) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "Rejected command");
            return CommandReply::from(e);
        }
    };

    let kind = command.type_name();
    match execute(ctx, command).await {
        Ok(reply) => {
            debug!(command = kind, "Command handled");
            reply
        }
        Err(e) => {
            warn!(command = kind, error = %e, "Command failed");
            CommandReply::error(e.code(), e.to_string())
        }
    }
}

async fn execute(ctx: &EngineContext, command: EngineCommand) -> SyncResult<CommandReply> {
    match command {
        EngineCommand::SkipWaiting => {
            let report = ctx.skip_waiting().await?;
            Ok(match report {
                Some(report) => CommandReply::ok(serde_json::to_value(report)?),
                None => CommandReply::done("Already active"),
            })
        }
        EngineCommand::CacheStockData(batch) => {
            let now = Utc::now().to_rfc3339();
            let records = batch
                .into_records()
                .into_iter()
                .map(|record| with_field(record, "last_updated", Value::String(now.clone())))
                .collect::<SyncResult<Vec<_>>>()?;
            cache_records(ctx, Collection::Stock, records).await
        }
        EngineCommand::CacheProductData(batch) => {
            cache_records(ctx, Collection::Products, batch.into_records()).await
        }
        EngineCommand::CacheCustomerData(batch) => {
            cache_records(ctx, Collection::Customers, batch.into_records()).await
        }
        EngineCommand::CacheSalesData(batch) => cache_records(ctx, Collection::Sales, batch.into_records()).await,
        EngineCommand::GetCachedData(request) => get_cached(ctx, request).await,
        EngineCommand::BarcodeScan(request) => barcode_scan(ctx, request).await,
        EngineCommand::SyncStatus => Ok(CommandReply::ok(serde_json::to_value(ctx.queues.status().await)?)),
        EngineCommand::ClearCache(request) => clear_cache(ctx, request),
        EngineCommand::OfflineSalesEntry(sale) => offline_sale(ctx, sale).await,
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn cache_records(ctx: &EngineContext, collection: Collection, records: Vec<Value>) -> SyncResult<CommandReply> {
    let written = ctx.offline.put(collection, &records).await?;
    info!(collection = %collection, written, "Records cached offline");
    Ok(CommandReply::ok(json!({ "cached": written })))
}

async fn get_cached(ctx: &EngineContext, request: CachedDataRequest) -> SyncResult<CommandReply> {
    let collection = Collection::from_str(&request.collection)?;

    match ctx.offline.get_all(collection, &request.query).await {
        Ok(records) => Ok(CommandReply::ok(Value::Array(records))),
        Err(e) if e.is_input_error() => Err(e.into()),
        Err(e) => {
            warn!(collection = %collection, error = %e, "Offline read failed, answering empty");
            Ok(CommandReply::ok(Value::Array(Vec::new())))
        }
    }
}

async fn barcode_scan(ctx: &EngineContext, request: BarcodeScanRequest) -> SyncResult<CommandReply> {
    let found = ctx.offline.lookup_barcode(&request.barcode).await.unwrap_or_else(|e| {
        warn!(barcode = %request.barcode, error = %e, "Barcode lookup failed");
        None
    });

    Ok(match found {
        Some(found) => CommandReply::ok(serde_json::to_value(found)?),
        None => CommandReply::error(
            ErrorCode::NotFound,
            format!("No offline product with barcode {}", request.barcode),
        ),
    })
}

fn clear_cache(ctx: &EngineContext, request: ClearCacheRequest) -> SyncResult<CommandReply> {
    if request.cache_type == "all" {
        let prefix = format!("{}-", ctx.names.namespace());
        let cleared: Vec<String> = ctx
            .cache
            .cache_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .filter(|name| ctx.cache.delete(name))
            .collect();
        info!(count = cleared.len(), "All caches cleared");
        return Ok(CommandReply::ok(json!({ "cleared": cleared })));
    }

    let kind = CacheKind::from_str(&request.cache_type)?;
    let name = ctx.names.name(kind);
    ctx.cache.delete(&name);
    info!(cache = %name, "Cache cleared");
    Ok(CommandReply::ok(json!({ "cleared": [name] })))
}

/// Stores a sale made offline and queues it for upload.
///
/// Online, the sale goes straight into the sales queue and a drain is
/// started. Offline, a `pending_uploads` row is written instead and promoted
/// when connectivity returns.
async fn offline_sale(ctx: &EngineContext, sale: Value) -> SyncResult<CommandReply> {
    let now = Value::String(Utc::now().to_rfc3339());
    let mut sale = with_field(sale, "status", json!("offline"))?;
    sale = with_field(sale, "sync_pending", json!(true))?;
    if sale.get("timestamp").map_or(true, Value::is_null) {
        sale = with_field(sale, "timestamp", now.clone())?;
    }

    let sale_id = ctx.offline.put_one(Collection::Sales, &sale).await?;
    if let Value::Object(fields) = &mut sale {
        fields.insert("id".to_string(), sale_id.clone());
    }

    let online = ctx.is_online();
    if online {
        let request = RequestSnapshot::json("POST", ctx.config.sync.sales_endpoint.as_str(), &sale);
        ctx.queues.enqueue(SyncDomain::Sales, &request).await?;

        let queues = ctx.queues.clone();
        tokio::spawn(async move {
            queues.drain(SyncDomain::Sales).await;
        });
    } else {
        ctx.offline
            .put_one(
                Collection::PendingUploads,
                &json!({ "type": "sale", "sale_id": sale_id, "timestamp": now }),
            )
            .await?;
    }

    info!(sale_id = %sale_id, online, "Offline sale recorded");
    Ok(CommandReply::ok(json!({ "id": sale_id, "queued": online })))
}

/// Sets `field` on a JSON object record.
fn with_field(record: Value, field: &str, value: Value) -> SyncResult<Value> {
    let mut fields: Map<String, Value> = match record {
        Value::Object(fields) => fields,
        other => {
            return Err(SyncError::Core(CoreError::InvalidPayload {
                command: "record".to_string(),
                reason: format!("expected a JSON object, got {other}"),
            }))
        }
    };
    fields.insert(field.to_string(), value);
    Ok(Value::Object(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fetch::MockFetcher;
    use crate::notify::NoOpSink;
    use stockroom_core::{HttpResponse, RecordQuery};
    use stockroom_db::{Database, DbConfig};

    async fn context() -> Arc<EngineContext> {
        let mut config = EngineConfig::default();
        config.sync.retry_blocked = false;
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.offline().ensure_schema().await.unwrap();
        EngineContext::new(config, db, Arc::new(MockFetcher::new()), Arc::new(NoOpSink))
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let ctx = context().await;
        let reply = request(&ctx, json!({"type": "FORMAT_DISK"})).await;
        assert!(!reply.success);
        assert_eq!(reply.code, Some(ErrorCode::UnknownCommand));
    }

    #[tokio::test]
    async fn test_concurrent_replies_never_cross() {
        let ctx = context().await;
        ctx.offline
            .put(Collection::Products, &[json!({"id": "P1", "barcode": "111"})])
            .await
            .unwrap();

        let found = dispatch(&ctx, json!({"type": "BARCODE_SCAN", "data": {"barcode": "111"}}));
        let missing = dispatch(&ctx, json!({"type": "BARCODE_SCAN", "data": {"barcode": "999"}}));

        let missing = missing.await.unwrap();
        let found = found.await.unwrap();
        assert!(found.success);
        assert_eq!(found.data.unwrap()["product"]["id"], "P1");
        assert_eq!(missing.code, Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_caching_twice_keeps_one_row() {
        let ctx = context().await;
        let product = json!({"type": "CACHE_PRODUCT_DATA", "data": {"id": "P1", "name": "Tea"}});

        assert!(request(&ctx, product.clone()).await.success);
        assert!(request(&ctx, product).await.success);
        assert_eq!(ctx.offline.count(Collection::Products).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_cached_data_errors() {
        let ctx = context().await;

        let reply = request(&ctx, json!({"type": "GET_CACHED_DATA", "data": {"type": "invoices"}})).await;
        assert_eq!(reply.code, Some(ErrorCode::UnknownCollection));

        let reply = request(
            &ctx,
            json!({"type": "GET_CACHED_DATA", "data": {"type": "stock", "query": {"index": "colour", "value": "red"}}}),
        )
        .await;
        assert_eq!(reply.code, Some(ErrorCode::InvalidPayload));
    }

    #[tokio::test]
    async fn test_get_cached_data_by_index() {
        let ctx = context().await;
        request(
            &ctx,
            json!({"type": "CACHE_CUSTOMER_DATA", "data": [
                {"id": "C1", "name": "Ada", "phone": "1"},
                {"id": "C2", "name": "Grace", "phone": "2"}
            ]}),
        )
        .await;

        let reply = request(
            &ctx,
            json!({"type": "GET_CACHED_DATA", "data": {"type": "customers", "query": {"index": "name", "value": "Grace"}}}),
        )
        .await;
        assert_eq!(reply.data.unwrap(), json!([{"id": "C2", "name": "Grace", "phone": "2"}]));
    }

    #[tokio::test]
    async fn test_clear_cache_by_type_and_all() {
        let ctx = context().await;
        for kind in [CacheKind::Api, CacheKind::Images] {
            ctx.cache.put(&ctx.names.name(kind), "GET /x", HttpResponse::new(200, "x"));
        }
        ctx.cache.put("someone-else", "GET /x", HttpResponse::new(200, "x"));

        let reply = request(&ctx, json!({"type": "CLEAR_CACHE", "data": {"cacheType": "images"}})).await;
        assert!(reply.success);
        assert!(!ctx.cache.has_cache(&ctx.names.name(CacheKind::Images)));

        let reply = request(&ctx, json!({"type": "CLEAR_CACHE", "data": {"cacheType": "fonts"}})).await;
        assert_eq!(reply.code, Some(ErrorCode::UnknownCacheType));

        request(&ctx, json!({"type": "CLEAR_CACHE", "data": {"cacheType": "all"}})).await;
        assert_eq!(ctx.cache.cache_names(), vec!["someone-else"]);
    }

    #[tokio::test]
    async fn test_offline_sale_while_offline_waits_in_pending_uploads() {
        let ctx = context().await;
        ctx.connectivity.set(false);

        let reply = request(&ctx, json!({"type": "OFFLINE_SALES_ENTRY", "data": {"total": 12}})).await;
        assert_eq!(reply.data.unwrap()["queued"], false);

        let pending = ctx
            .offline
            .get_all(Collection::PendingUploads, &RecordQuery::all())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["type"], "sale");
        assert_eq!(ctx.queues.status().await.total_pending, 0);
    }

    #[tokio::test]
    async fn test_offline_sale_rejects_non_objects() {
        let ctx = context().await;
        let reply = request(&ctx, json!({"type": "OFFLINE_SALES_ENTRY", "data": [1, 2]})).await;
        assert_eq!(reply.code, Some(ErrorCode::InvalidPayload));
    }
}
