//! # Offline Schema
//!
//! Declarative, versioned schema of the offline data store.
//!
//! Every collection is a table of `(key, data, updated_at)` where `data` is
//! the record as JSON. Secondary indices are SQLite expression indices over
//! `json_extract(data, '$.<field>')`.
//!
//! ```text
//! ┌──────────────────┬──────────────┬──────────────────────────────────────┐
//! │ collection       │ key          │ indices                              │
//! ├──────────────────┼──────────────┼──────────────────────────────────────┤
//! │ sales            │ id (auto)    │ timestamp, customer, status          │
//! │ stock            │ product_id   │ barcode, category, last_updated      │
//! │ products         │ id           │ barcode, name, category              │
//! │ customers        │ id           │ name, phone                          │
//! │ suppliers        │ id           │ name, category                       │
//! │ pending_uploads  │ id (auto)    │ type, timestamp                      │
//! └──────────────────┴──────────────┴──────────────────────────────────────┘
//! ```
//!
//! Auto-increment collections draw generated keys from `key_generators`,
//! one row per collection holding the next key to hand out.
//!
//! ## Upgrades
//! Each table and index records the schema version that introduced it.
//! Upgrading to version N creates whatever is missing up to N and nothing is
//! ever dropped. The applied version lives in `PRAGMA user_version`.

use sqlx::SqlitePool;
use stockroom_core::Collection;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

/// Current offline schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A secondary index over one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name used in queries.
    pub name: &'static str,
    /// Record field the index covers.
    pub field: &'static str,
    /// Schema version that introduced the index.
    pub since: u32,
}

/// A collection declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub collection: Collection,
    /// Record field holding the primary key.
    pub key_path: &'static str,
    /// Keys are generated when the record has none. Supplied keys are kept.
    pub auto_increment: bool,
    pub indices: &'static [IndexDef],
    pub since: u32,
}

const fn idx(name: &'static str) -> IndexDef {
    IndexDef {
        name,
        field: name,
        since: 1,
    }
}

pub const SALES: TableDef = TableDef {
    collection: Collection::Sales,
    key_path: "id",
    auto_increment: true,
    indices: &[idx("timestamp"), idx("customer"), idx("status")],
    since: 1,
};

pub const STOCK: TableDef = TableDef {
    collection: Collection::Stock,
    key_path: "product_id",
    auto_increment: false,
    indices: &[idx("barcode"), idx("category"), idx("last_updated")],
    since: 1,
};

pub const PRODUCTS: TableDef = TableDef {
    collection: Collection::Products,
    key_path: "id",
    auto_increment: false,
    indices: &[idx("barcode"), idx("name"), idx("category")],
    since: 1,
};

pub const CUSTOMERS: TableDef = TableDef {
    collection: Collection::Customers,
    key_path: "id",
    auto_increment: false,
    indices: &[idx("name"), idx("phone")],
    since: 1,
};

pub const SUPPLIERS: TableDef = TableDef {
    collection: Collection::Suppliers,
    key_path: "id",
    auto_increment: false,
    indices: &[idx("name"), idx("category")],
    since: 1,
};

pub const PENDING_UPLOADS: TableDef = TableDef {
    collection: Collection::PendingUploads,
    key_path: "id",
    auto_increment: true,
    indices: &[idx("type"), idx("timestamp")],
    since: 1,
};

/// The whole schema, in creation order.
pub const OFFLINE_SCHEMA: [TableDef; 6] = [SALES, STOCK, PRODUCTS, CUSTOMERS, SUPPLIERS, PENDING_UPLOADS];

impl TableDef {
    pub fn table(&self) -> &'static str {
        self.collection.as_str()
    }

    /// Looks up a declared index by name.
    pub fn index(&self, name: &str) -> DbResult<&IndexDef> {
        self.indices
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| DbError::UnknownIndex {
                collection: self.table().to_string(),
                index: name.to_string(),
            })
    }

    /// `json_extract` expression for a field. Queries must use the exact same
    /// text for SQLite to pick the expression index.
    pub fn field_expr(field: &str) -> String {
        format!("json_extract(data, '$.{field}')")
    }

    fn create_table_sql(&self) -> String {
        let key = if self.auto_increment {
            "key PRIMARY KEY NOT NULL"
        } else {
            "key TEXT PRIMARY KEY NOT NULL"
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({key}, data TEXT NOT NULL, updated_at TEXT NOT NULL)",
            self.table()
        )
    }

    fn create_index_sql(&self, index: &IndexDef) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{name} ON {table} ({expr})",
            table = self.table(),
            name = index.name,
            expr = Self::field_expr(index.field)
        )
    }
}

/// Returns the definition of a collection.
pub fn table_def(collection: Collection) -> &'static TableDef {
    match collection {
        Collection::Sales => &SALES,
        Collection::Stock => &STOCK,
        Collection::Products => &PRODUCTS,
        Collection::Customers => &CUSTOMERS,
        Collection::Suppliers => &SUPPLIERS,
        Collection::PendingUploads => &PENDING_UPLOADS,
    }
}

/// Reads the applied schema version.
pub async fn schema_version(pool: &SqlitePool) -> DbResult<u32> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version.max(0) as u32)
}

/// Upgrades the offline schema to `target`.
///
/// Creates every table and index introduced at or before `target` that does
/// not exist yet. Existing tables, indices and rows are left alone, and the
/// recorded version never goes down.
///
/// ## Returns
/// The version recorded after the upgrade.
pub async fn upgrade(pool: &SqlitePool, target: u32) -> DbResult<u32> {
    let current = schema_version(pool).await?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS key_generators (collection TEXT PRIMARY KEY NOT NULL, next_key INTEGER NOT NULL)",
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| DbError::Migration(format!("key_generators: {e}")))?;

    for def in OFFLINE_SCHEMA.iter().filter(|d| d.since <= target) {
        sqlx::query(&def.create_table_sql())
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{}: {e}", def.table())))?;

        for index in def.indices.iter().filter(|i| i.since <= target) {
            sqlx::query(&def.create_index_sql(index))
                .execute(&mut *tx)
                .await
                .map_err(|e| DbError::Migration(format!("{}.{}: {e}", def.table(), index.name)))?;
        }
        debug!(collection = %def.collection, "Collection ready");
    }

    let recorded = current.max(target);
    // PRAGMA does not take bound parameters
    sqlx::query(&format!("PRAGMA user_version = {recorded}"))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    if recorded != current {
        info!(from = current, to = recorded, "Offline schema upgraded");
    }
    Ok(recorded)
}
