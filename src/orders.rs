//! Orders collection.
//!
//! Orders are created on the terminal and written here before any network
//! call is made. The local id comes from SQLite's autoincrement and never
//! changes. The `synced` flag moves from 0 to 1 exactly once; rows are never
//! deleted so the table doubles as an audit trail.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{DbState, SubmissionClaim};
use crate::error::{StorageError, StorageResult};
use crate::models::{timestamp, OrderLine, OrderSource, OrderStatus};

/// Sync state of a local order, stored as 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncFlag {
    Unsynced = 0,
    Synced = 1,
}

impl SyncFlag {
    fn as_i64(self) -> i64 {
        self as i64
    }

    fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(SyncFlag::Unsynced),
            1 => Some(SyncFlag::Synced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalOrder {
    pub id: i64,
    pub source: OrderSource,
    pub status: OrderStatus,
    pub items: Vec<OrderLine>,
    pub synced: SyncFlag,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Server-assigned id, once known. Unrelated to `id`.
    pub remote_order_id: Option<i64>,
}

/// An order that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocalOrder {
    pub source: OrderSource,
    pub status: OrderStatus,
    pub items: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
}

impl NewLocalOrder {
    pub fn pending(source: OrderSource, items: Vec<OrderLine>) -> Self {
        Self {
            source,
            status: OrderStatus::Pending,
            items,
            created_at: Utc::now(),
        }
    }
}

/// Partial update. `None` fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub synced: Option<SyncFlag>,
    pub remote_order_id: Option<i64>,
}

/// Equality filter over one indexed column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderFilter {
    Source(OrderSource),
    Status(OrderStatus),
    Synced(SyncFlag),
    RemoteOrderId(i64),
}

impl OrderFilter {
    fn column(self) -> &'static str {
        match self {
            OrderFilter::Source(_) => "source",
            OrderFilter::Status(_) => "status",
            OrderFilter::Synced(_) => "synced",
            OrderFilter::RemoteOrderId(_) => "remote_order_id",
        }
    }

    fn value(self) -> rusqlite::types::Value {
        match self {
            OrderFilter::Source(s) => s.as_str().to_string().into(),
            OrderFilter::Status(s) => s.as_str().to_string().into(),
            OrderFilter::Synced(f) => f.as_i64().into(),
            OrderFilter::RemoteOrderId(id) => id.into(),
        }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, source, status, items, synced, created_at, updated_at, remote_order_id FROM orders";

fn conversion_err(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn invalid_column(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.to_string(), Type::Text)
}

fn row_to_order(row: &Row<'_>) -> rusqlite::Result<LocalOrder> {
    let source: String = row.get(1)?;
    let status: String = row.get(2)?;
    let items_json: String = row.get(3)?;
    let synced: i64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: Option<String> = row.get(6)?;

    Ok(LocalOrder {
        id: row.get(0)?,
        source: source.parse().map_err(|_| invalid_column(1, "source"))?,
        status: status.parse().map_err(|_| invalid_column(2, "status"))?,
        items: serde_json::from_str(&items_json).map_err(|e| conversion_err(3, e))?,
        synced: SyncFlag::from_i64(synced).ok_or_else(|| invalid_column(4, "synced"))?,
        created_at: timestamp::parse(&created_at).ok_or_else(|| invalid_column(5, "created_at"))?,
        updated_at: match updated_at {
            Some(raw) => Some(timestamp::parse(&raw).ok_or_else(|| invalid_column(6, "updated_at"))?),
            None => None,
        },
        remote_order_id: row.get(7)?,
    })
}

fn load(conn: &Connection, id: i64) -> StorageResult<Option<LocalOrder>> {
    let order = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], row_to_order)
        .optional()?;
    Ok(order)
}

fn items_to_json(items: &[OrderLine]) -> StorageResult<String> {
    Ok(serde_json::to_string(items)?)
}

fn insert(conn: &Connection, order: &NewLocalOrder) -> StorageResult<i64> {
    let items = items_to_json(&order.items)?;
    conn.execute(
        "INSERT INTO orders (source, status, items, synced, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![
            order.source.as_str(),
            order.status.as_str(),
            items,
            timestamp::format(&order.created_at),
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!(local_id = id, source = %order.source, lines = order.items.len(), "Local order recorded");
    Ok(id)
}

/// Insert a new order with `synced = 0` and return its local id.
///
/// This is the durability anchor of the submission flow: once it returns
/// `Ok`, the order survives a crash or a network outage.
pub fn add_order(db: &DbState, order: &NewLocalOrder) -> StorageResult<i64> {
    let conn = db.lock()?;
    insert(&conn, order)
}

/// Like [`add_order`], but the new order is already claimed for submission
/// when it becomes visible to other readers, so a sync push cannot pick it
/// up while the caller is sending it.
pub fn add_order_claimed<'a>(
    db: &'a DbState,
    order: &NewLocalOrder,
) -> StorageResult<SubmissionClaim<'a>> {
    let conn = db.lock()?;
    let id = insert(&conn, order)?;
    db.try_claim(id).ok_or(StorageError::AlreadyClaimed(id))
}

pub fn get_order(db: &DbState, id: i64) -> StorageResult<Option<LocalOrder>> {
    let conn = db.lock()?;
    load(&conn, id)
}

/// Merge `patch` into the stored order and return the result.
pub fn update_order(db: &DbState, id: i64, patch: &OrderPatch) -> StorageResult<LocalOrder> {
    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    let current = load(&tx, id)?.ok_or(StorageError::OrderNotFound(id))?;
    if current.synced == SyncFlag::Synced && patch.synced == Some(SyncFlag::Unsynced) {
        return Err(StorageError::SyncedRegression(id));
    }

    let status = patch.status.unwrap_or(current.status);
    let synced = patch.synced.unwrap_or(current.synced);
    let remote_order_id = patch.remote_order_id.or(current.remote_order_id);
    let now = Utc::now();

    tx.execute(
        "UPDATE orders SET status = ?1, synced = ?2, remote_order_id = ?3, updated_at = ?4
         WHERE id = ?5",
        params![
            status.as_str(),
            synced.as_i64(),
            remote_order_id,
            timestamp::format(&now),
            id
        ],
    )?;
    let updated = load(&tx, id)?.ok_or(StorageError::OrderNotFound(id))?;
    tx.commit()?;
    Ok(updated)
}

/// Write the full record, inserting it when no row with `order.id` exists.
pub fn put_order(db: &DbState, order: &LocalOrder) -> StorageResult<()> {
    let items = items_to_json(&order.items)?;
    let mut conn = db.lock()?;
    let tx = conn.transaction()?;

    if let Some(current) = load(&tx, order.id)? {
        if current.synced == SyncFlag::Synced && order.synced == SyncFlag::Unsynced {
            return Err(StorageError::SyncedRegression(order.id));
        }
    }

    tx.execute(
        "INSERT INTO orders (id, source, status, items, synced, created_at, updated_at, remote_order_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            source = excluded.source,
            status = excluded.status,
            items = excluded.items,
            synced = excluded.synced,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            remote_order_id = excluded.remote_order_id",
        params![
            order.id,
            order.source.as_str(),
            order.status.as_str(),
            items,
            order.synced.as_i64(),
            timestamp::format(&order.created_at),
            order.updated_at.as_ref().map(timestamp::format),
            order.remote_order_id,
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// Flip an order to synced and record the server's id for it.
pub fn mark_synced(db: &DbState, id: i64, remote_order_id: Option<i64>) -> StorageResult<LocalOrder> {
    let order = update_order(
        db,
        id,
        &OrderPatch {
            synced: Some(SyncFlag::Synced),
            remote_order_id,
            ..OrderPatch::default()
        },
    )?;
    debug!(local_id = id, remote_order_id = ?remote_order_id, "Order marked synced");
    Ok(order)
}

/// Orders matching `filter`, in store (id) order.
pub fn find_where(db: &DbState, filter: OrderFilter) -> StorageResult<Vec<LocalOrder>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE {} = ?1 ORDER BY id ASC",
        filter.column()
    ))?;
    let orders = stmt
        .query_map(params![filter.value()], row_to_order)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(orders)
}

/// Orders still waiting to reach the backend.
pub fn pending_sync(db: &DbState) -> StorageResult<Vec<LocalOrder>> {
    find_where(db, OrderFilter::Synced(SyncFlag::Unsynced))
}

pub fn list_orders(db: &DbState) -> StorageResult<Vec<LocalOrder>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
    let orders = stmt
        .query_map([], row_to_order)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(orders)
}

/// `(unsynced, synced)` row counts.
pub fn sync_counts(db: &DbState) -> StorageResult<(i64, i64)> {
    let conn = db.lock()?;
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(synced = 0), 0), COALESCE(SUM(synced = 1), 0) FROM orders",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}
