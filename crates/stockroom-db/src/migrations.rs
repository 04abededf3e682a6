//! # Database Migrations
//!
//! The engine's bookkeeping tables, shipped as embedded SQL.
//!
//! ```text
//! migrations/sqlite/001_sync_queue.sql
//!   sync_queue   captured mutating requests, FIFO by id per queue_name
//!   sync_state   last confirmed replay per queue
//! ```
//!
//! Offline collections are not migrations: they belong to the versioned
//! schema in [`crate::schema`] and are created at install. Migration files
//! are append-only; a change is always a new `NNN_description.sql`.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every migration not yet recorded in `_sqlx_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let (total, applied) = migration_status(pool).await?;
    if applied >= total {
        debug!(total, "Migrations up to date");
        return Ok(());
    }

    MIGRATOR.run(pool).await?;
    info!(applied = total - applied, "Migrations applied");
    Ok(())
}

/// Returns `(total, applied)`. A fresh database has applied none.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if tracked == 0 {
        return Ok((total, 0));
    }

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await?;
    Ok((total, usize::try_from(applied).unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_fresh_database_has_none_applied() {
        let db = Database::new(DbConfig::in_memory().run_migrations(false)).await.unwrap();
        let (total, applied) = migration_status(db.pool()).await.unwrap();
        assert!(total >= 1);
        assert_eq!(applied, 0);

        run_migrations(db.pool()).await.unwrap();
        assert_eq!(migration_status(db.pool()).await.unwrap(), (total, total));

        // second run is a no-op
        run_migrations(db.pool()).await.unwrap();
    }
}
