//! Database connection management.
//!
//! The [`Database`] struct is a cheaply cloneable handle over a single
//! shared [`rusqlite::Connection`].  The sync engine, the outbound queue
//! and the session task all hold clones of the same handle; the inner mutex
//! serializes statement execution while [`Database::with_transaction`]
//! keeps multi-table writes atomic.
//!
//! Opening a database does not create the schema.  Callers must run
//! [`Database::init`] first; every other operation fails with
//! [`StoreError::NotInitialized`] until then.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use directories::ProjectDirs;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Transaction};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Shared handle to the local SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    initialized: Arc<AtomicBool>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data
    /// directory:
    /// - Linux:   `~/.local/share/palaver/palaver.db`
    /// - macOS:   `~/Library/Application Support/org.palaver.palaver/palaver.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\palaver\palaver\data\palaver.db`
    pub fn open() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "palaver", "palaver").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("palaver.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// Useful for tests and for embedding the store inside custom directory
    /// layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Foreign keys are the backbone of the dependency-ordering
        // invariant; they must be on before any write.
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            initialized: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create tables and record the schema version.
    ///
    /// Idempotent: calling `init` on an already-initialized database is a
    /// no-op success.  Until `init` runs, every query/update fails with
    /// [`StoreError::NotInitialized`].
    pub fn init(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Lock the connection for a single statement or read.
    ///
    /// Crate-internal: the typed CRUD helpers in the sibling modules are the
    /// public surface.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        Ok(self.conn.lock())
    }

    /// Run `f` inside a single SQLite transaction, committing on `Ok` and
    /// rolling back entirely on `Err`.
    ///
    /// Every write path touching more than one table (a chat plus its
    /// participant rows, a message plus its chat preview) must go through
    /// here so another async operation never observes a partial write.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run an ad-hoc query against the raw connection.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for one-off reads.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.lock().path().map(PathBuf::from)
    }
}
