//! Local SQLite database for the terminal.
//!
//! Uses rusqlite with WAL mode. Holds the two collections the terminal
//! owns: `menu` (cached from the backend) and `orders` (created locally).
//! Provides schema migrations and the shared connection state.

use rusqlite::Connection;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::error::{StorageError, StorageResult};

pub const DB_FILE_NAME: &str = "terminal.db";

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Shared database handle. Every collection operation takes the lock for
/// its whole duration, which makes each operation atomic.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
    /// Local order ids currently being sent to the backend.
    submitting: Mutex<HashSet<i64>>,
}

/// Exclusive right to submit one local order. Released on drop.
#[derive(Debug)]
pub struct SubmissionClaim<'a> {
    owner: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl SubmissionClaim<'_> {
    pub fn id(&self) -> i64 {
        self.id
    }
}

impl Drop for SubmissionClaim<'_> {
    fn drop(&mut self) {
        self.owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl DbState {
    fn new(conn: Connection, db_path: PathBuf) -> Self {
        Self {
            conn: Mutex::new(conn),
            db_path,
            submitting: Mutex::new(HashSet::new()),
        }
    }

    pub fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(StorageError::from)
    }

    /// Claim order `id` for submission. `None` while someone else holds it.
    pub fn try_claim(&self, id: i64) -> Option<SubmissionClaim<'_>> {
        let mut submitting = self.submitting.lock().unwrap_or_else(PoisonError::into_inner);
        submitting.insert(id).then(|| SubmissionClaim {
            owner: &self.submitting,
            id,
        })
    }

    pub fn is_claimed(&self, id: i64) -> bool {
        self.submitting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    /// Fresh in-memory database with all migrations applied.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self::new(conn, PathBuf::from(":memory:")))
    }
}

/// Initialize the database at `{data_dir}/terminal.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. If the file cannot be opened or
/// configured it is deleted and opened once more.
pub fn init(data_dir: &Path) -> StorageResult<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState::new(conn, db_path))
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> StorageResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    // Fails fast on a corrupt file so `init` can recreate it.
    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: menu cache and local orders.
fn migrate_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        BEGIN;

        -- menu (server-owned, upserted by id)
        CREATE TABLE IF NOT EXISTS menu (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            price TEXT NOT NULL,
            available INTEGER NOT NULL DEFAULT 1,
            image_url TEXT,
            updated_at TEXT
        );

        -- orders (terminal-owned, never deleted)
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL CHECK (source IN ('pos', 'kiosk')),
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'preparing', 'ready', 'completed')),
            items TEXT NOT NULL DEFAULT '[]',
            synced INTEGER NOT NULL DEFAULT 0 CHECK (synced IN (0, 1)),
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_menu_updated_at ON menu(updated_at);
        CREATE INDEX IF NOT EXISTS idx_orders_source ON orders(source);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_synced ON orders(synced);
        CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);
        CREATE INDEX IF NOT EXISTS idx_orders_updated_at ON orders(updated_at);

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        let _ = conn.execute_batch("ROLLBACK;");
        StorageError::from(e)
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: server order cross-reference and the synced-flag guard.
fn migrate_v2(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        BEGIN;

        ALTER TABLE orders ADD COLUMN remote_order_id INTEGER;
        CREATE INDEX IF NOT EXISTS idx_orders_remote_order_id ON orders(remote_order_id);

        CREATE TRIGGER IF NOT EXISTS trg_orders_synced_forward_only
        BEFORE UPDATE OF synced ON orders
        WHEN OLD.synced = 1 AND NEW.synced = 0
        BEGIN
            SELECT RAISE(ABORT, 'synced flag cannot go back to unsynced');
        END;

        INSERT INTO schema_version (version) VALUES (2);

        COMMIT;
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        let _ = conn.execute_batch("ROLLBACK;");
        StorageError::from(e)
    })?;

    info!("Applied migration v2");
    Ok(())
}
