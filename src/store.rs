//! Persisted order store.
//!
//! The fiscal core reads and updates orders through the [`OrderStore`]
//! trait; the bundled [`SqliteOrderStore`] keeps them in SQLite with WAL
//! mode and schema-version migrations, matching the POS's local database
//! layer. The retry workflow depends on this persistence so it survives
//! process restarts.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

use crate::types::FiscalStatus;

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

// ---------------------------------------------------------------------------
// Errors and rows
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("order not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// A persisted order line item.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    /// Unit price in EUR (storage keeps decimal currency; the fiscal layer
    /// converts to cents).
    pub unit_price: f64,
    pub total_price: f64,
}

/// A persisted order with its line items.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub id: String,
    pub customer_name: Option<String>,
    pub notes: Option<String>,
    /// Total in EUR.
    pub total_amount: f64,
    pub fiscal_status: FiscalStatus,
    pub fiscal_external_id: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: String,
    pub items: Vec<StoredOrderItem>,
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Order persistence consumed by the fiscal core.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Read one order and its line items.
    async fn order_with_items(&self, order_id: &str) -> Result<Option<StoredOrder>, StoreError>;

    /// All orders with `fiscal_status = 'error'`, oldest first, bounded.
    async fn failed_fiscal_orders(&self, limit: usize) -> Result<Vec<StoredOrder>, StoreError>;

    /// Transition an order to `success` with the provider's identifiers.
    async fn mark_fiscal_success(
        &self,
        order_id: &str,
        external_id: &str,
        pdf_url: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Transition an order to `error`, appending (never replacing) the error
    /// text to its notes for audit visibility.
    async fn append_fiscal_error(&self, order_id: &str, error_text: &str)
        -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed order store.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
    pub db_path: Option<PathBuf>,
}

impl SqliteOrderStore {
    /// Open (or create) the store at `path` and run pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_and_configure(path)?;
        run_migrations(&conn)?;
        info!("Order store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StoreError::from)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    /// Insert an order and its line items. Used when an order is created.
    pub fn insert_order(&self, order: &StoredOrder) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let now = Utc::now().to_rfc3339();

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::from)?;
        let result = (|| -> Result<(), StoreError> {
            conn.execute(
                "INSERT INTO orders (
                    id, customer_name, notes, total_amount, fiscal_status,
                    fiscal_external_id, pdf_url, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    order.id,
                    order.customer_name,
                    order.notes,
                    order.total_amount,
                    order.fiscal_status.as_str(),
                    order.fiscal_external_id,
                    order.pdf_url,
                    order.created_at,
                    now,
                ],
            )?;
            for item in &order.items {
                conn.execute(
                    "INSERT INTO order_items (
                        id, order_id, product_id, product_name,
                        quantity, unit_price, total_price
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        order.id,
                        item.product_id,
                        item.product_name,
                        item.quantity,
                        item.unit_price,
                        item.total_price,
                    ],
                )?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT").map_err(StoreError::from)?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn order_with_items(&self, order_id: &str) -> Result<Option<StoredOrder>, StoreError> {
        let conn = self.lock_conn();
        let order = conn
            .query_row(
                "SELECT id, customer_name, notes, total_amount, fiscal_status,
                        fiscal_external_id, pdf_url, created_at
                 FROM orders WHERE id = ?1",
                params![order_id],
                row_to_order,
            )
            .optional()?;

        match order {
            Some(mut order) => {
                order.items = load_items(&conn, &order.id)?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    async fn failed_fiscal_orders(&self, limit: usize) -> Result<Vec<StoredOrder>, StoreError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, customer_name, notes, total_amount, fiscal_status,
                    fiscal_external_id, pdf_url, created_at
             FROM orders
             WHERE fiscal_status = 'error'
             ORDER BY created_at ASC
             LIMIT ?1",
        )?;
        let mut orders: Vec<StoredOrder> = stmt
            .query_map(params![limit as i64], row_to_order)?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        for order in &mut orders {
            order.items = load_items(&conn, &order.id)?;
        }
        Ok(orders)
    }

    async fn mark_fiscal_success(
        &self,
        order_id: &str,
        external_id: &str,
        pdf_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE orders SET
                fiscal_status = 'success',
                fiscal_external_id = ?1,
                pdf_url = ?2,
                updated_at = ?3
             WHERE id = ?4",
            params![external_id, pdf_url, Utc::now().to_rfc3339(), order_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(order_id.to_string()));
        }
        Ok(())
    }

    async fn append_fiscal_error(
        &self,
        order_id: &str,
        error_text: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn();
        let notes: Option<String> = conn
            .query_row(
                "SELECT notes FROM orders WHERE id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))?;

        let new_notes = match notes.as_deref() {
            Some(existing) if !existing.is_empty() => format!("{existing} | {error_text}"),
            _ => error_text.to_string(),
        };

        conn.execute(
            "UPDATE orders SET
                fiscal_status = 'error',
                notes = ?1,
                updated_at = ?2
             WHERE id = ?3",
            params![new_notes, Utc::now().to_rfc3339(), order_id],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connection setup / migrations
// ---------------------------------------------------------------------------

fn open_and_configure(path: &Path) -> Result<Connection, StoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| StoreError::Database(format!("create data dir: {e}")))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(StoreError::from)?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(StoreError::from)?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if current < 1 {
        conn.execute_batch(
            "CREATE TABLE orders (
                id TEXT PRIMARY KEY,
                customer_name TEXT,
                notes TEXT,
                total_amount REAL NOT NULL DEFAULT 0,
                fiscal_status TEXT NOT NULL DEFAULT 'pending',
                fiscal_external_id TEXT,
                pdf_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE order_items (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                product_id TEXT NOT NULL,
                product_name TEXT NOT NULL,
                quantity INTEGER NOT NULL DEFAULT 1,
                unit_price REAL NOT NULL DEFAULT 0,
                total_price REAL NOT NULL DEFAULT 0
            );
            CREATE INDEX idx_orders_fiscal_status ON orders(fiscal_status, created_at);
            CREATE INDEX idx_order_items_order ON order_items(order_id);
            INSERT INTO schema_version (version) VALUES (1);",
        )
        .map_err(StoreError::from)?;
    }

    info!("Order store schema migrated to v{CURRENT_SCHEMA_VERSION}");
    Ok(())
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredOrder> {
    let status: String = row.get(4)?;
    Ok(StoredOrder {
        id: row.get(0)?,
        customer_name: row.get(1)?,
        notes: row.get(2)?,
        total_amount: row.get(3)?,
        fiscal_status: FiscalStatus::from_db(&status),
        fiscal_external_id: row.get(5)?,
        pdf_url: row.get(6)?,
        created_at: row.get(7)?,
        items: Vec::new(),
    })
}

fn load_items(conn: &Connection, order_id: &str) -> Result<Vec<StoredOrderItem>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT product_id, product_name, quantity, unit_price, total_price
         FROM order_items WHERE order_id = ?1 ORDER BY rowid",
    )?;
    let items = stmt
        .query_map(params![order_id], |row| {
            Ok(StoredOrderItem {
                product_id: row.get(0)?,
                product_name: row.get(1)?,
                quantity: row.get(2)?,
                unit_price: row.get(3)?,
                total_price: row.get(4)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(items)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order(id: &str, created_at: &str, fiscal_status: FiscalStatus) -> StoredOrder {
        StoredOrder {
            id: id.into(),
            customer_name: Some("Mario".into()),
            notes: None,
            total_amount: 17.0,
            fiscal_status,
            fiscal_external_id: None,
            pdf_url: None,
            created_at: created_at.into(),
            items: vec![StoredOrderItem {
                product_id: "p-espresso".into(),
                product_name: "Espresso".into(),
                quantity: 2,
                unit_price: 8.5,
                total_price: 17.0,
            }],
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_round_trip() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        let order = sample_order("ord-1", "2026-08-24T09:00:00Z", FiscalStatus::Pending);
        store.insert_order(&order).unwrap();

        let loaded = store.order_with_items("ord-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "ord-1");
        assert_eq!(loaded.customer_name.as_deref(), Some("Mario"));
        assert_eq!(loaded.fiscal_status, FiscalStatus::Pending);
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.items[0].product_name, "Espresso");
        assert_eq!(loaded.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_missing_order_is_none() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        assert!(store.order_with_items("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_orders_oldest_first_with_limit() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        store
            .insert_order(&sample_order(
                "ord-new",
                "2026-08-24T12:00:00Z",
                FiscalStatus::Error,
            ))
            .unwrap();
        store
            .insert_order(&sample_order(
                "ord-old",
                "2026-08-24T08:00:00Z",
                FiscalStatus::Error,
            ))
            .unwrap();
        store
            .insert_order(&sample_order(
                "ord-ok",
                "2026-08-24T07:00:00Z",
                FiscalStatus::Success,
            ))
            .unwrap();

        let failed = store.failed_fiscal_orders(10).await.unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].id, "ord-old");
        assert_eq!(failed[1].id, "ord-new");
        assert!(!failed[0].items.is_empty());

        let limited = store.failed_fiscal_orders(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "ord-old");
    }

    #[tokio::test]
    async fn test_mark_fiscal_success() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        store
            .insert_order(&sample_order(
                "ord-1",
                "2026-08-24T09:00:00Z",
                FiscalStatus::Error,
            ))
            .unwrap();

        store
            .mark_fiscal_success("ord-1", "EXT-9", Some("https://r.pdf"))
            .await
            .unwrap();

        let order = store.order_with_items("ord-1").await.unwrap().unwrap();
        assert_eq!(order.fiscal_status, FiscalStatus::Success);
        assert_eq!(order.fiscal_external_id.as_deref(), Some("EXT-9"));
        assert_eq!(order.pdf_url.as_deref(), Some("https://r.pdf"));
    }

    #[tokio::test]
    async fn test_mark_success_unknown_order_errors() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        let err = store
            .mark_fiscal_success("nope", "EXT-9", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_append_fiscal_error_accumulates_notes() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        let mut order = sample_order("ord-1", "2026-08-24T09:00:00Z", FiscalStatus::Pending);
        order.notes = Some("n/a".into());
        store.insert_order(&order).unwrap();

        store
            .append_fiscal_error("ord-1", "Fiscal error: first")
            .await
            .unwrap();
        store
            .append_fiscal_error("ord-1", "Fiscal retry error: second")
            .await
            .unwrap();

        let loaded = store.order_with_items("ord-1").await.unwrap().unwrap();
        assert_eq!(loaded.fiscal_status, FiscalStatus::Error);
        assert_eq!(
            loaded.notes.as_deref(),
            Some("n/a | Fiscal error: first | Fiscal retry error: second")
        );
    }

    #[tokio::test]
    async fn test_append_fiscal_error_without_existing_notes() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        store
            .insert_order(&sample_order(
                "ord-1",
                "2026-08-24T09:00:00Z",
                FiscalStatus::Pending,
            ))
            .unwrap();

        store
            .append_fiscal_error("ord-1", "Fiscal error: boom")
            .await
            .unwrap();
        let loaded = store.order_with_items("ord-1").await.unwrap().unwrap();
        assert_eq!(loaded.notes.as_deref(), Some("Fiscal error: boom"));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = SqliteOrderStore::open_in_memory().unwrap();
        let conn = store.lock_conn();
        run_migrations(&conn).unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }
}
