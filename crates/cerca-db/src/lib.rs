//! Cerca's moderation and account-lifecycle core.
//!
//! Everything here runs against a single SQLite connection guarded by a
//! mutex. Multi-statement operations run inside one transaction; a
//! transaction that is dropped without committing rolls back.

pub mod clock;
pub mod content;
pub mod error;
pub mod migrations;
pub mod models;
pub mod modlog;
pub mod proposals;
pub mod pwhash;
pub mod removal;
pub mod users;

#[cfg(test)]
mod testutil;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Params, Transaction};
use tracing::info;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DbError, Environ, OptionalExt, Result};
pub use proposals::{Finalization, Moderation, ProposalScope};
pub use pwhash::PwhashMigration;

pub struct Database {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    scope: ProposalScope,
    deleted_user_id: i64,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).environ("open database")?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")
            .environ("open database: set journal mode")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().environ("open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .environ("open database: enable foreign keys")?;

        migrations::run(&conn)?;
        let deleted_user_id = migrations::ensure_deleted_user(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
            scope: ProposalScope::default(),
            deleted_user_id,
        })
    }

    /// Replaces the wall clock, e.g. with a [`ManualClock`] in tests.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_proposal_scope(mut self, scope: ProposalScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Commits if `f` returns `Ok`; any error
    /// drops the transaction, which rolls it back.
    pub fn with_tx<F, T>(&self, environ: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .environ(&format!("{environ}: begin transaction"))?;
        let value = f(&tx)?;
        tx.commit()
            .environ(&format!("{environ}: commit transaction"))?;
        Ok(value)
    }
}

/// `SELECT EXISTS (<subquery>)`.
pub fn exists<P: Params>(
    conn: &Connection,
    subquery: &str,
    params: P,
) -> rusqlite::Result<bool> {
    conn.query_row(&format!("SELECT EXISTS ({subquery})"), params, |row| {
        row.get(0)
    })
}
