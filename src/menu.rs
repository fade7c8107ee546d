//! Menu collection.
//!
//! The backend owns the menu; the terminal keeps a snapshot in the local
//! `menu` table, keyed by item id. Items are upserted on every full fetch or
//! delta pull and never deleted, so an offline terminal keeps selling from
//! the last known snapshot.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

use crate::db::DbState;
use crate::error::StorageResult;
use crate::models::{timestamp, MenuItem};

const UPSERT_SQL: &str = "INSERT INTO menu (id, name, price, available, image_url, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        price = excluded.price,
        available = excluded.available,
        image_url = excluded.image_url,
        updated_at = COALESCE(excluded.updated_at, menu.updated_at)";

/// Delta rows older than the cached copy are ignored.
const UPSERT_NEWER_SQL: &str = "INSERT INTO menu (id, name, price, available, image_url, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        price = excluded.price,
        available = excluded.available,
        image_url = excluded.image_url,
        updated_at = COALESCE(excluded.updated_at, menu.updated_at)
     WHERE excluded.updated_at IS NULL
        OR menu.updated_at IS NULL
        OR excluded.updated_at >= menu.updated_at";

const SELECT_COLUMNS: &str = "SELECT id, name, price, available, image_url, updated_at FROM menu";

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<MenuItem> {
    let price_raw: String = row.get(2)?;
    let price = Decimal::from_str(&price_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let updated_at = match row.get::<_, Option<String>>(5)? {
        Some(raw) => Some(
            timestamp::parse(&raw)
                .ok_or_else(|| rusqlite::Error::InvalidColumnType(5, "updated_at".into(), Type::Text))?,
        ),
        None => None,
    };
    Ok(MenuItem {
        id: row.get(0)?,
        name: row.get(1)?,
        price,
        available: row.get::<_, i64>(3)? != 0,
        image_url: row.get(4)?,
        updated_at,
    })
}

fn upsert(conn: &rusqlite::Connection, sql: &str, item: &MenuItem) -> rusqlite::Result<usize> {
    conn.execute(
        sql,
        params![
            item.id,
            item.name,
            item.price.to_string(),
            item.available as i64,
            item.image_url,
            item.updated_at.as_ref().map(timestamp::format),
        ],
    )
}

/// Upsert one item by id. The server copy always wins.
///
/// Returns `true` when the row was written.
pub fn put_item(db: &DbState, item: &MenuItem) -> StorageResult<bool> {
    let conn = db.lock()?;
    Ok(upsert(&conn, UPSERT_SQL, item)? > 0)
}

fn write_batch(db: &DbState, sql: &str, items: &[MenuItem]) -> StorageResult<usize> {
    let mut conn = db.lock()?;
    let tx = conn.transaction()?;
    let mut written = 0;
    for item in items {
        written += upsert(&tx, sql, item)?;
    }
    tx.commit()?;
    Ok(written)
}

/// Upsert a full menu fetch in one transaction, overwriting cached rows.
/// Returns how many rows were written.
pub fn put_items(db: &DbState, items: &[MenuItem]) -> StorageResult<usize> {
    let written = write_batch(db, UPSERT_SQL, items)?;
    debug!(received = items.len(), written, "Menu items upserted");
    Ok(written)
}

/// Merge a delta pull. A row carrying an older `updated_at` than the cached
/// one is skipped, so the watermark never moves backwards.
pub fn apply_delta(db: &DbState, items: &[MenuItem]) -> StorageResult<usize> {
    let written = write_batch(db, UPSERT_NEWER_SQL, items)?;
    debug!(received = items.len(), written, "Menu delta applied");
    Ok(written)
}

pub fn get_item(db: &DbState, id: i64) -> StorageResult<Option<MenuItem>> {
    let conn = db.lock()?;
    let item = conn
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], row_to_item)
        .optional()?;
    Ok(item)
}

/// All cached items ordered by id.
pub fn list_items(db: &DbState) -> StorageResult<Vec<MenuItem>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
    let items = stmt
        .query_map([], row_to_item)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Cached items that can currently be sold.
pub fn list_available(db: &DbState) -> StorageResult<Vec<MenuItem>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE available = 1 ORDER BY id ASC"))?;
    let items = stmt
        .query_map([], row_to_item)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub fn count(db: &DbState) -> StorageResult<i64> {
    let conn = db.lock()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM menu", [], |row| row.get(0))?)
}

/// Delta-pull watermark: the newest `updated_at` among cached items, or
/// `None` when nothing with a timestamp is cached (forces a full pull).
pub fn latest_updated_at(db: &DbState) -> StorageResult<Option<DateTime<Utc>>> {
    let conn = db.lock()?;
    let raw: Option<String> =
        conn.query_row("SELECT MAX(updated_at) FROM menu", [], |row| row.get(0))?;
    Ok(raw.as_deref().and_then(timestamp::parse))
}
