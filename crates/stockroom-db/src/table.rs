//! # Generic Table
//!
//! One typed handle per offline collection: `Table<String>` for keyed
//! collections, `Table<RecordId>` for auto-increment ones.
//!
//! ```text
//!   put(record) ──► key from record[key_path]
//!                     ├── present ──► INSERT ... ON CONFLICT(key) DO UPDATE
//!                     │               (integer keys also advance the generator)
//!                     └── absent or null
//!                          ├── auto-increment ──► next key from key_generators,
//!                          │                      written back into the record
//!                          └── keyed ──────────► DbError::MissingKey
//! ```
//!
//! Auto-increment tables declare their key column without a type, so SQLite
//! keeps integer and text keys as given and orders integers first.

use std::fmt::{self, Display};
use std::marker::PhantomData;

use chrono::Utc;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use stockroom_core::RecordQuery;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::schema::TableDef;

// =============================================================================
// Keys
// =============================================================================

/// A key as it is bound into a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParam {
    Int(i64),
    Text(String),
}

/// Binds a [`RecordKey`] to the next placeholder of a query.
macro_rules! bind_key {
    ($query:expr, $key:expr) => {
        match $key.param() {
            KeyParam::Int(i) => $query.bind(i),
            KeyParam::Text(s) => $query.bind(s),
        }
    };
}

/// A primary key type a collection can use.
pub trait RecordKey: Clone + Display + Send + Sync + 'static {
    /// Reads the key out of a record field. `None` when the value cannot be a key.
    fn from_json(value: &Value) -> Option<Self>;

    /// Parses a key given as text (e.g. from a URL).
    fn parse(raw: &str) -> Option<Self>;

    fn to_json(&self) -> Value;

    fn param(&self) -> KeyParam;
}

impl RecordKey for String {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        (!raw.is_empty()).then(|| raw.to_string())
    }

    fn to_json(&self) -> Value {
        Value::String(self.clone())
    }

    fn param(&self) -> KeyParam {
        KeyParam::Text(self.clone())
    }
}

/// Key of an auto-increment collection: generated integer or caller-supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{i}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl RecordKey for RecordId {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => RecordId::Int(i),
                None => RecordId::Text(n.to_string()),
            }),
            Value::String(s) if !s.is_empty() => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    /// Integer text is read as a generated key, anything else as a text key.
    fn parse(raw: &str) -> Option<Self> {
        match raw.parse::<i64>() {
            Ok(i) => Some(RecordId::Int(i)),
            Err(_) => String::parse(raw).map(RecordId::Text),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Text(s) => Value::String(s.clone()),
        }
    }

    fn param(&self) -> KeyParam {
        match self {
            RecordId::Int(i) => KeyParam::Int(*i),
            RecordId::Text(s) => KeyParam::Text(s.clone()),
        }
    }
}

// =============================================================================
// Table
// =============================================================================

/// Typed handle on one collection.
#[derive(Debug)]
pub struct Table<K> {
    pool: SqlitePool,
    def: &'static TableDef,
    _key: PhantomData<fn() -> K>,
}

impl<K> Clone for Table<K> {
    fn clone(&self) -> Self {
        Table {
            pool: self.pool.clone(),
            def: self.def,
            _key: PhantomData,
        }
    }
}

impl<K: RecordKey> Table<K> {
    pub fn new(pool: SqlitePool, def: &'static TableDef) -> Self {
        Table {
            pool,
            def,
            _key: PhantomData,
        }
    }

    pub fn def(&self) -> &'static TableDef {
        self.def
    }

    /// Upserts one record and returns its key.
    pub async fn put(&self, record: &Value) -> DbResult<K> {
        let mut tx = self.pool.begin().await?;
        let key = upsert::<K>(&mut *tx, self.def, record).await?;
        tx.commit().await?;
        Ok(key)
    }

    /// Upserts many records in one transaction. Either all land or none do.
    pub async fn put_many(&self, records: &[Value]) -> DbResult<Vec<K>> {
        let mut tx = self.pool.begin().await?;
        let mut keys = Vec::with_capacity(records.len());
        for record in records {
            keys.push(upsert::<K>(&mut *tx, self.def, record).await?);
        }
        tx.commit().await?;

        debug!(collection = %self.def.collection, count = keys.len(), "Records stored");
        Ok(keys)
    }

    /// Fetches one record by primary key.
    pub async fn get(&self, key: &K) -> DbResult<Option<Value>> {
        let sql = format!("SELECT data FROM {} WHERE key = ?1", self.def.table());
        let query = sqlx::query_scalar::<_, String>(&sql);
        let data = bind_key!(query, key).fetch_optional(&self.pool).await?;

        data.map(|d| serde_json::from_str(&d).map_err(DbError::from))
            .transpose()
    }

    /// Reads records in key order, optionally filtered by one index.
    ///
    /// A `null` (or absent) `value` with an index matches records where the
    /// field is missing or null.
    pub async fn get_all(&self, query: &RecordQuery) -> DbResult<Vec<Value>> {
        let mut sql = format!("SELECT data FROM {}", self.def.table());

        let mut filter: Option<&Value> = None;
        if let Some(name) = &query.index {
            let index = self.def.index(name)?;
            let expr = TableDef::field_expr(index.field);
            match query.value.as_ref() {
                None | Some(Value::Null) => sql.push_str(&format!(" WHERE {expr} IS NULL")),
                Some(value) => {
                    sql.push_str(&format!(" WHERE {expr} = ?1"));
                    filter = Some(value);
                }
            }
        }

        sql.push_str(" ORDER BY key");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_scalar::<_, String>(&sql);
        if let Some(value) = filter {
            q = match value {
                Value::Bool(b) => q.bind(i64::from(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => q.bind(i),
                    None => q.bind(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => q.bind(s.clone()),
                other => q.bind(other.to_string()),
            };
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|d| serde_json::from_str(d).map_err(DbError::from))
            .collect()
    }

    /// Deletes one record. Returns whether it existed.
    pub async fn delete(&self, key: &K) -> DbResult<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.def.table());
        let result = bind_key!(sqlx::query(&sql), key).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every record. Returns how many were removed.
    pub async fn clear(&self) -> DbResult<u64> {
        let sql = format!("DELETE FROM {}", self.def.table());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.def.table());
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }
}

/// Upserts one record on an open connection.
async fn upsert<K: RecordKey>(
    conn: &mut SqliteConnection,
    def: &TableDef,
    record: &Value,
) -> DbResult<K> {
    if !record.is_object() {
        return Err(DbError::InvalidRecord {
            collection: def.table().to_string(),
            reason: "record must be a JSON object".to_string(),
        });
    }

    let raw_key = record.get(def.key_path).filter(|v| !v.is_null());
    let key = match raw_key {
        Some(value) => match K::from_json(value) {
            Some(key) => key,
            None if def.auto_increment => {
                return Err(DbError::InvalidRecord {
                    collection: def.table().to_string(),
                    reason: format!("'{}' is not a valid key: {value}", def.key_path),
                })
            }
            None => return Err(missing_key(def)),
        },
        None if def.auto_increment => return insert_generated(conn, def, record).await,
        None => return Err(missing_key(def)),
    };

    let sql = format!(
        "INSERT INTO {} (key, data, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
        def.table()
    );
    bind_key!(sqlx::query(&sql), key)
        .bind(record.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;

    if let (true, KeyParam::Int(used)) = (def.auto_increment, key.param()) {
        advance_generator(conn, def, used).await?;
    }
    Ok(key)
}

/// Inserts a record without a key under the collection's next generated key.
async fn insert_generated<K: RecordKey>(
    conn: &mut SqliteConnection,
    def: &TableDef,
    record: &Value,
) -> DbResult<K> {
    let next: i64 = sqlx::query_scalar(
        "INSERT INTO key_generators (collection, next_key) VALUES (?1, 2) \
         ON CONFLICT(collection) DO UPDATE SET next_key = next_key + 1 \
         RETURNING next_key - 1",
    )
    .bind(def.table())
    .fetch_one(&mut *conn)
    .await?;

    let generated = Value::from(next);
    let key = K::from_json(&generated).ok_or_else(|| missing_key(def))?;

    let mut stored = record.clone();
    stored[def.key_path] = generated;
    let sql = format!(
        "INSERT INTO {} (key, data, updated_at) VALUES (?1, ?2, ?3)",
        def.table()
    );
    bind_key!(sqlx::query(&sql), key)
        .bind(stored.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;
    Ok(key)
}

/// Keeps generated keys above any integer key written explicitly.
async fn advance_generator(conn: &mut SqliteConnection, def: &TableDef, used: i64) -> DbResult<()> {
    sqlx::query(
        "INSERT INTO key_generators (collection, next_key) VALUES (?1, ?2) \
         ON CONFLICT(collection) DO UPDATE SET next_key = MAX(next_key, excluded.next_key)",
    )
    .bind(def.table())
    .bind(used.saturating_add(1).max(1))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn missing_key(def: &TableDef) -> DbError {
    DbError::MissingKey {
        collection: def.table().to_string(),
        key_path: def.key_path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::schema::{self, PRODUCTS, SALES};
    use serde_json::json;

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        schema::upgrade(db.pool(), schema::SCHEMA_VERSION).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_put_and_get_all_round_trip() {
        let db = setup().await;
        let products: Table<String> = Table::new(db.pool().clone(), &PRODUCTS);

        let record = json!({"id": "P1", "name": "Milk", "barcode": "111", "price": 1.25});
        let key = products.put(&record).await.unwrap();
        assert_eq!(key, "P1");

        let all = products.get_all(&RecordQuery::all()).await.unwrap();
        assert_eq!(all, vec![record]);
    }

    #[tokio::test]
    async fn test_put_same_key_twice_leaves_one_row() {
        let db = setup().await;
        let products: Table<String> = Table::new(db.pool().clone(), &PRODUCTS);

        products.put(&json!({"id": "P1", "name": "Milk"})).await.unwrap();
        products.put(&json!({"id": "P1", "name": "Whole milk"})).await.unwrap();

        assert_eq!(products.count().await.unwrap(), 1);
        let stored = products.get(&"P1".to_string()).await.unwrap().unwrap();
        assert_eq!(stored["name"], "Whole milk");
    }

    #[tokio::test]
    async fn test_numeric_keys_are_accepted_for_text_tables() {
        let db = setup().await;
        let products: Table<String> = Table::new(db.pool().clone(), &PRODUCTS);

        let key = products.put(&json!({"id": 42, "name": "Bread"})).await.unwrap();
        assert_eq!(key, "42");
        assert!(products.get(&"42".to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_auto_increment_assigns_and_stores_key() {
        let db = setup().await;
        let sales: Table<RecordId> = Table::new(db.pool().clone(), &SALES);

        let first = sales.put(&json!({"total": 10, "status": "offline"})).await.unwrap();
        let second = sales.put(&json!({"total": 20, "status": "offline", "id": null})).await.unwrap();
        assert_eq!(first, RecordId::Int(1));
        assert_eq!(second, RecordId::Int(2));

        let stored = sales.get(&first).await.unwrap().unwrap();
        assert_eq!(stored["id"], json!(1));
        assert_eq!(stored["total"], 10);
    }

    #[tokio::test]
    async fn test_auto_increment_keeps_supplied_text_key() {
        let db = setup().await;
        let sales: Table<RecordId> = Table::new(db.pool().clone(), &SALES);

        let sale = json!({"id": "INV-001", "total": 10, "status": "completed"});
        let key = sales.put(&sale).await.unwrap();
        assert_eq!(key, RecordId::Text("INV-001".to_string()));
        sales.put(&sale).await.unwrap();

        let all = sales.get_all(&RecordQuery::all()).await.unwrap();
        assert_eq!(all, vec![sale]);
    }

    #[tokio::test]
    async fn test_generated_keys_skip_supplied_integers() {
        let db = setup().await;
        let sales: Table<RecordId> = Table::new(db.pool().clone(), &SALES);

        sales.put(&json!({"id": 5, "total": 1})).await.unwrap();
        sales.put(&json!({"id": "INV-002", "total": 2})).await.unwrap();
        let generated = sales.put(&json!({"total": 3})).await.unwrap();
        assert_eq!(generated, RecordId::Int(6));

        // integers sort before text keys
        let ids: Vec<Value> = sales
            .get_all(&RecordQuery::all())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(5), json!(6), json!("INV-002")]);

        let err = sales.put(&json!({"id": true})).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected() {
        let db = setup().await;
        let products: Table<String> = Table::new(db.pool().clone(), &PRODUCTS);

        let err = products.put(&json!({"name": "No id"})).await.unwrap_err();
        assert!(matches!(err, DbError::MissingKey { .. }));

        let err = products.put(&json!("not an object")).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_put_many_is_atomic() {
        let db = setup().await;
        let products: Table<String> = Table::new(db.pool().clone(), &PRODUCTS);

        let batch = vec![json!({"id": "A"}), json!({"name": "missing id"})];
        assert!(products.put_many(&batch).await.is_err());
        assert_eq!(products.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_index_filter_and_limit() {
        let db = setup().await;
        let products: Table<String> = Table::new(db.pool().clone(), &PRODUCTS);

        products
            .put_many(&[
                json!({"id": "A", "category": "dairy"}),
                json!({"id": "B", "category": "bakery"}),
                json!({"id": "C", "category": "dairy"}),
                json!({"id": "D"}),
            ])
            .await
            .unwrap();

        let dairy = products
            .get_all(&RecordQuery::by_index("category", "dairy"))
            .await
            .unwrap();
        assert_eq!(dairy.len(), 2);
        assert_eq!(dairy[0]["id"], "A");

        let limited = products.get_all(&RecordQuery::all().with_limit(3)).await.unwrap();
        assert_eq!(limited.len(), 3);

        let uncategorised = products
            .get_all(&RecordQuery {
                index: Some("category".to_string()),
                value: None,
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(uncategorised.len(), 1);

        let err = products
            .get_all(&RecordQuery::by_index("phone", "555"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownIndex { .. }));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let db = setup().await;
        let products: Table<String> = Table::new(db.pool().clone(), &PRODUCTS);

        products.put_many(&[json!({"id": "A"}), json!({"id": "B"})]).await.unwrap();
        assert!(products.delete(&"A".to_string()).await.unwrap());
        assert!(!products.delete(&"A".to_string()).await.unwrap());
        assert_eq!(products.clear().await.unwrap(), 1);
        assert_eq!(products.count().await.unwrap(), 0);
    }
}
