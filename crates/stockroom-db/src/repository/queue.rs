//! # Sync Queue Repository
//!
//! Durable storage of the per-domain sync queues.
//!
//! ## Queue Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       sync_queue (one table, many queues)               │
//! │                                                                         │
//! │   id │ queue_name    │ method │ url             │ body │ enqueued_at    │
//! │  ────┼───────────────┼────────┼─────────────────┼──────┼─────────────── │
//! │   1  │ sales-sync    │ POST   │ /api/sales      │ {..} │ 10:00:01       │
//! │   2  │ stock-sync    │ PUT    │ /api/stock/P1   │ {..} │ 10:00:02       │
//! │   3  │ sales-sync    │ POST   │ /api/sales      │ {..} │ 10:00:05       │
//! │                                                                         │
//! │  FIFO per queue = ORDER BY id within queue_name                        │
//! │                                                                         │
//! │  DRAIN (one queue)                                                     │
//! │  1. peek()      SELECT ... WHERE queue_name = ? ORDER BY id LIMIT 1    │
//! │  2. replay the captured request                                        │
//! │  3a. success:   remove(id)            → next entry                     │
//! │  3b. failure:   mark_failed(id, err)  → entry stays at the head, stop  │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • An entry is removed only after its replay succeeded                 │
//! │  • A failed head is never skipped                                      │
//! │  • Queues survive restarts                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Because the head is only *peeked*, a failed replay never has to be
//! re-inserted: "push back to the head" is simply not deleting the row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use stockroom_core::RequestSnapshot;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// A request waiting in a sync queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    /// Monotonic id; defines FIFO order.
    pub id: i64,
    pub queue_name: String,
    pub request: RequestSnapshot,
    pub enqueued_at: DateTime<Utc>,
    /// Failed replays so far.
    pub attempts: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, FromRow)]
struct QueueRow {
    id: i64,
    queue_name: String,
    method: String,
    url: String,
    headers: String,
    body: Option<Vec<u8>>,
    enqueued_at: DateTime<Utc>,
    attempts: i64,
    last_error: Option<String>,
}

impl TryFrom<QueueRow> for QueuedRequest {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let headers: BTreeMap<String, String> = serde_json::from_str(&row.headers)?;
        Ok(QueuedRequest {
            id: row.id,
            queue_name: row.queue_name,
            request: RequestSnapshot {
                method: row.method,
                url: row.url,
                headers,
                body: row.body,
            },
            enqueued_at: row.enqueued_at,
            attempts: row.attempts,
            last_error: row.last_error,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, queue_name, method, url, headers, body, enqueued_at, attempts, last_error";

/// Repository for sync queue operations.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Appends a request to the tail of a queue.
    ///
    /// ## Arguments
    /// * `queue_name` - e.g. `"sales-sync"`
    /// * `request` - Full snapshot to replay later
    ///
    /// ## Example
    /// ```rust,ignore
    /// let entry = repo.enqueue("sales-sync", &RequestSnapshot::json("POST", "/api/sales", &sale)).await?;
    /// ```
    pub async fn enqueue(&self, queue_name: &str, request: &RequestSnapshot) -> DbResult<QueuedRequest> {
        let now = Utc::now();
        let headers = serde_json::to_string(&request.headers)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_queue (queue_name, method, url, headers, body, enqueued_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
        )
        .bind(queue_name)
        .bind(&request.method)
        .bind(&request.url)
        .bind(&headers)
        .bind(request.body.as_deref())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!(queue = %queue_name, id, method = %request.method, url = %request.url, "Request enqueued");

        Ok(QueuedRequest {
            id,
            queue_name: queue_name.to_string(),
            request: request.clone(),
            enqueued_at: now,
            attempts: 0,
            last_error: None,
        })
    }

    /// Returns the head of a queue without removing it.
    pub async fn peek(&self, queue_name: &str) -> DbResult<Option<QueuedRequest>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM sync_queue WHERE queue_name = ?1 ORDER BY id ASC LIMIT 1"
        );
        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueuedRequest::try_from).transpose()
    }

    /// Returns every entry of a queue in FIFO order.
    pub async fn list(&self, queue_name: &str) -> DbResult<Vec<QueuedRequest>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM sync_queue WHERE queue_name = ?1 ORDER BY id ASC");
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(queue_name)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(QueuedRequest::try_from).collect()
    }

    /// Removes an entry after its replay was confirmed.
    ///
    /// ## Returns
    /// Whether a row was deleted.
    pub async fn remove(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed replay. The entry stays where it is.
    pub async fn mark_failed(&self, id: i64, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of entries in a queue.
    pub async fn len(&self, queue_name: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue WHERE queue_name = ?1")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Drops every entry of a queue.
    pub async fn clear(&self, queue_name: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE queue_name = ?1")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Records a confirmed replay for `queue_name`.
    pub async fn record_success(&self, queue_name: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (queue_name, last_success_at, replayed_total)
            VALUES (?1, ?2, 1)
            ON CONFLICT(queue_name) DO UPDATE SET
                last_success_at = excluded.last_success_at,
                replayed_total = replayed_total + 1
            "#,
        )
        .bind(queue_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent confirmed replay across all queues.
    pub async fn last_sync(&self) -> DbResult<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT last_success_at FROM sync_state ORDER BY last_success_at DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(last)
    }
}
