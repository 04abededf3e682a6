//! # Offline Data Store
//!
//! Local mirror of reference and transactional data for offline reads.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         OfflineStore                                    │
//! │                                                                         │
//! │   sales: Table<RecordId>   stock: Table<String>     products: Table<..> │
//! │   customers: Table<..>     suppliers: Table<..>     pending_uploads     │
//! │                                                                         │
//! │   put(collection, records)       ─┐                                     │
//! │   get_all(collection, query)      ├─► dispatch on Collection            │
//! │   get / delete / clear / count   ─┘                                     │
//! │                                                                         │
//! │   lookup_barcode(code)                                                  │
//! │     products[barcode = "code" or code] ──► product.id ──► stock[id]     │
//! │                                                      └─► {quantity: 0,  │
//! │                                                           last_updated: │
//! │                                                           null}         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde_json::Value;
use sqlx::SqlitePool;
use stockroom_core::{BarcodeMatch, Collection, RecordQuery};
use tracing::debug;

use crate::error::DbResult;
use crate::schema::{self, PENDING_UPLOADS, PRODUCTS, SALES, STOCK, CUSTOMERS, SUPPLIERS};
use crate::table::{RecordId, RecordKey, Table};

/// Runs `$body` with `$t` bound to the table of `$collection`.
macro_rules! with_table {
    ($store:expr, $collection:expr, |$t:ident| $body:expr) => {
        match $collection {
            Collection::Sales => {
                let $t = &$store.sales;
                $body
            }
            Collection::Stock => {
                let $t = &$store.stock;
                $body
            }
            Collection::Products => {
                let $t = &$store.products;
                $body
            }
            Collection::Customers => {
                let $t = &$store.customers;
                $body
            }
            Collection::Suppliers => {
                let $t = &$store.suppliers;
                $body
            }
            Collection::PendingUploads => {
                let $t = &$store.pending_uploads;
                $body
            }
        }
    };
}

/// Handle on every offline collection.
#[derive(Debug, Clone)]
pub struct OfflineStore {
    pool: SqlitePool,
    pub sales: Table<RecordId>,
    pub stock: Table<String>,
    pub products: Table<String>,
    pub customers: Table<String>,
    pub suppliers: Table<String>,
    pub pending_uploads: Table<RecordId>,
}

impl OfflineStore {
    pub fn new(pool: SqlitePool) -> Self {
        OfflineStore {
            sales: Table::new(pool.clone(), &SALES),
            stock: Table::new(pool.clone(), &STOCK),
            products: Table::new(pool.clone(), &PRODUCTS),
            customers: Table::new(pool.clone(), &CUSTOMERS),
            suppliers: Table::new(pool.clone(), &SUPPLIERS),
            pending_uploads: Table::new(pool.clone(), &PENDING_UPLOADS),
            pool,
        }
    }

    /// Brings the offline schema up to the current version.
    pub async fn ensure_schema(&self) -> DbResult<u32> {
        schema::upgrade(&self.pool, schema::SCHEMA_VERSION).await
    }

    /// Upserts records into a collection. Returns how many were written.
    pub async fn put(&self, collection: Collection, records: &[Value]) -> DbResult<usize> {
        with_table!(self, collection, |t| t.put_many(records).await.map(|keys| keys.len()))
    }

    /// Upserts one record and returns its key as JSON.
    pub async fn put_one(&self, collection: Collection, record: &Value) -> DbResult<Value> {
        with_table!(self, collection, |t| t.put(record).await.map(|k| k.to_json()))
    }

    pub async fn get_all(&self, collection: Collection, query: &RecordQuery) -> DbResult<Vec<Value>> {
        with_table!(self, collection, |t| t.get_all(query).await)
    }

    /// Fetches by key given as text. Unparseable keys simply match nothing.
    pub async fn get(&self, collection: Collection, key: &str) -> DbResult<Option<Value>> {
        with_table!(self, collection, |t| match RecordKey::parse(key) {
            Some(k) => t.get(&k).await,
            None => Ok(None),
        })
    }

    /// Fetches by a key taken from another record, e.g. `pending_uploads.sale_id`.
    pub async fn get_by_key(&self, collection: Collection, key: &Value) -> DbResult<Option<Value>> {
        with_table!(self, collection, |t| match RecordKey::from_json(key) {
            Some(k) => t.get(&k).await,
            None => Ok(None),
        })
    }

    pub async fn delete_by_key(&self, collection: Collection, key: &Value) -> DbResult<bool> {
        with_table!(self, collection, |t| match RecordKey::from_json(key) {
            Some(k) => t.delete(&k).await,
            None => Ok(false),
        })
    }

    pub async fn delete(&self, collection: Collection, key: &str) -> DbResult<bool> {
        with_table!(self, collection, |t| match RecordKey::parse(key) {
            Some(k) => t.delete(&k).await,
            None => Ok(false),
        })
    }

    pub async fn clear(&self, collection: Collection) -> DbResult<u64> {
        with_table!(self, collection, |t| t.clear().await)
    }

    pub async fn count(&self, collection: Collection) -> DbResult<i64> {
        with_table!(self, collection, |t| t.count().await)
    }

    /// Resolves a barcode to its product and stock record.
    ///
    /// Barcodes cached as JSON numbers match their decimal text.
    ///
    /// ## Returns
    /// * `Ok(None)` - No product carries this barcode
    /// * `Ok(Some(m))` - The product, with the stock record or
    ///   [`BarcodeMatch::unknown_stock`] when no stock row exists for it
    pub async fn lookup_barcode(&self, barcode: &str) -> DbResult<Option<BarcodeMatch>> {
        let mut found = self.products_by_barcode(Value::from(barcode)).await?;
        if found.is_empty() {
            if let Some(numeric) = numeric_barcode(barcode) {
                found = self.products_by_barcode(numeric).await?;
            }
        }

        let Some(product) = found.pop() else {
            debug!(barcode = %barcode, "Barcode not in offline catalogue");
            return Ok(None);
        };

        let stock = match product.get("id").and_then(String::from_json) {
            Some(product_id) => self.stock.get(&product_id).await?,
            None => None,
        };

        Ok(Some(BarcodeMatch::new(product, stock)))
    }

    async fn products_by_barcode(&self, barcode: Value) -> DbResult<Vec<Value>> {
        let query = RecordQuery {
            index: Some("barcode".to_string()),
            value: Some(barcode),
            limit: Some(1),
        };
        self.products.get_all(&query).await
    }
}

/// The number a barcode would have been cached as, if it round-trips exactly.
fn numeric_barcode(barcode: &str) -> Option<Value> {
    let n: u64 = barcode.parse().ok()?;
    (n.to_string() == barcode).then(|| Value::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn store() -> OfflineStore {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = db.offline();
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_put_then_get_all_includes_record() {
        let store = store().await;
        let customer = json!({"id": "C1", "name": "Ada", "phone": "555-0100"});

        assert_eq!(store.put(Collection::Customers, &[customer.clone()]).await.unwrap(), 1);
        let all = store.get_all(Collection::Customers, &RecordQuery::all()).await.unwrap();
        assert!(all.contains(&customer));
    }

    #[tokio::test]
    async fn test_lookup_joins_product_and_stock() {
        let store = store().await;
        store
            .put(Collection::Products, &[json!({"id": "P1", "name": "Milk", "barcode": "5000"})])
            .await
            .unwrap();
        store
            .put(
                Collection::Stock,
                &[json!({"product_id": "P1", "quantity": 12, "last_updated": "2024-05-01T10:00:00Z"})],
            )
            .await
            .unwrap();

        let found = store.lookup_barcode("5000").await.unwrap().unwrap();
        assert_eq!(found.product["name"], "Milk");
        assert_eq!(found.stock["quantity"], 12);
        assert_eq!(found.stock["last_updated"], "2024-05-01T10:00:00Z");
    }

    #[tokio::test]
    async fn test_lookup_without_stock_defaults() {
        let store = store().await;
        store
            .put(Collection::Products, &[json!({"id": "P2", "barcode": "6000"})])
            .await
            .unwrap();

        let found = store.lookup_barcode("6000").await.unwrap().unwrap();
        assert_eq!(found.stock, json!({"quantity": 0, "last_updated": null}));

        assert!(store.lookup_barcode("0000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_given_as_text() {
        let store = store().await;
        let key = store
            .put_one(Collection::PendingUploads, &json!({"type": "sale", "sale_id": 1}))
            .await
            .unwrap();
        let key = key.as_i64().unwrap().to_string();

        assert!(store.get(Collection::PendingUploads, &key).await.unwrap().is_some());
        assert!(store.get(Collection::PendingUploads, "abc").await.unwrap().is_none());
        assert!(store.delete(Collection::PendingUploads, &key).await.unwrap());
        assert_eq!(store.count(Collection::PendingUploads).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_returns_whole_stock_record() {
        let store = store().await;
        store
            .put(Collection::Products, &[json!({"id": "P3", "name": "Cheese", "barcode": "7000"})])
            .await
            .unwrap();
        let stock = json!({
            "product_id": "P3",
            "quantity": 2.5,
            "location": "A1",
            "last_updated": "2024-05-01T10:00:00Z"
        });
        store.put(Collection::Stock, &[stock.clone()]).await.unwrap();

        let found = store.lookup_barcode("7000").await.unwrap().unwrap();
        assert_eq!(found.stock, stock);
    }

    #[tokio::test]
    async fn test_lookup_matches_numeric_barcode() {
        let store = store().await;
        store
            .put(Collection::Products, &[json!({"id": 42, "name": "Eggs", "barcode": 5012345})])
            .await
            .unwrap();
        store
            .put(Collection::Stock, &[json!({"product_id": 42, "quantity": 6})])
            .await
            .unwrap();

        let found = store.lookup_barcode("5012345").await.unwrap().unwrap();
        assert_eq!(found.product["name"], "Eggs");
        assert_eq!(found.stock["quantity"], 6);

        assert!(store.lookup_barcode("05012345").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_upload_resolves_text_sale_id() {
        let store = store().await;
        let sale = json!({"id": "INV-009", "total": 8, "status": "offline"});
        let sale_id = store.put_one(Collection::Sales, &sale).await.unwrap();
        assert_eq!(sale_id, json!("INV-009"));

        let upload_id = store
            .put_one(Collection::PendingUploads, &json!({"type": "sale", "sale_id": sale_id}))
            .await
            .unwrap();

        assert_eq!(store.get_by_key(Collection::Sales, &sale_id).await.unwrap(), Some(sale));
        assert!(store.delete_by_key(Collection::PendingUploads, &upload_id).await.unwrap());
        assert!(!store.delete_by_key(Collection::PendingUploads, &json!(null)).await.unwrap());
    }
}
