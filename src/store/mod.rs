//! Persistence layer for the module index.
//!
//! Backed by SQLite via `rusqlite`. A single writable connection is guarded
//! by a `tokio::sync::Mutex`; acquiring a [`Transaction`] takes the
//! connection for the duration of the outer transaction, which serialises
//! concurrent ingestions at the database boundary.
//!
//! Transaction scopes are explicit SQL (`BEGIN IMMEDIATE` / `COMMIT` /
//! `ROLLBACK`), and phase isolation uses named savepoints
//! (`SAVEPOINT` / `ROLLBACK TO` / `RELEASE`). Savepoint names are sanitised
//! to `[A-Za-z0-9_]+`, at most 64 characters, never starting with a digit.
//!
//! Both scope types roll back on drop unless explicitly completed, so an
//! early `?` return can never leave a transaction or savepoint open.

pub mod repos;

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Schema version recorded in `user_version`.
const SCHEMA_VERSION: i64 = 1;

/// Handle to the registry database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open (creating if necessary) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file cannot be opened or the schema
    /// cannot be initialised.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::error::RegistryError::io(parent, e, file!(), line!()))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (used by tests).
    ///
    /// # Errors
    ///
    /// Returns a storage error if schema initialisation fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "wal").ok();
        conn.pragma_update(None, "foreign_keys", "on")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Begin an outer transaction, taking exclusive use of the connection.
    ///
    /// # Errors
    ///
    /// Returns a storage error if `BEGIN IMMEDIATE` fails.
    pub async fn begin(&self) -> Result<Transaction> {
        let guard = Arc::clone(&self.conn).lock_owned().await;
        guard.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Transaction {
            guard,
            finished: false,
        })
    }

    /// Run a read-only closure against the connection outside any
    /// transaction scope.
    ///
    /// # Errors
    ///
    /// Propagates the closure's database errors.
    pub async fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let guard = self.conn.lock().await;
        Ok(f(&guard)?)
    }
}

/// An open outer transaction.
///
/// Owns the connection for its lifetime. Rolls back on drop unless
/// [`commit`](Self::commit) or [`rollback`](Self::rollback) was called.
pub struct Transaction {
    guard: OwnedMutexGuard<Connection>,
    finished: bool,
}

impl Transaction {
    /// The underlying connection, for repository operations.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.guard
    }

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns a storage error if `COMMIT` fails; the transaction is
    /// considered finished either way.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.guard.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Roll the transaction back explicitly.
    ///
    /// # Errors
    ///
    /// Returns a storage error if `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.guard.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Open a named savepoint within this transaction.
    ///
    /// The name is sanitised to SQL-safe form before use.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the `SAVEPOINT` statement fails.
    pub fn savepoint(&self, name: &str) -> Result<Savepoint<'_>> {
        let name = sanitise_savepoint_name(name);
        self.guard.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(Savepoint {
            tx: self,
            name,
            finished: false,
        })
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.guard.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "Failed to roll back abandoned transaction");
            }
        }
    }
}

/// A named savepoint scope within an outer transaction.
///
/// Rolls back to the savepoint on drop unless released.
pub struct Savepoint<'tx> {
    tx: &'tx Transaction,
    name: String,
    finished: bool,
}

impl Savepoint<'_> {
    /// The sanitised savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying connection, for repository operations.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        self.tx.conn()
    }

    /// Release the savepoint, keeping its changes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if `RELEASE` fails.
    pub fn release(mut self) -> Result<()> {
        self.finished = true;
        self.tx
            .conn()
            .execute_batch(&format!("RELEASE SAVEPOINT {}", self.name))?;
        Ok(())
    }

    /// Roll back to the savepoint, discarding its changes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rollback statements fail.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.tx.conn().execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}",
            name = self.name
        ))?;
        Ok(())
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let stmt = format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}",
                name = self.name
            );
            if let Err(e) = self.tx.conn().execute_batch(&stmt) {
                tracing::error!(savepoint = %self.name, error = %e, "Failed to roll back abandoned savepoint");
            }
        }
    }
}

/// Reduce an arbitrary string to a SQL-safe savepoint name:
/// `[A-Za-z0-9_]+`, at most 64 characters, never starting with a digit.
#[must_use]
pub fn sanitise_savepoint_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name = format!("sp_{name}");
    }
    name.truncate(64);
    name
}

/// Create the schema if it doesn't exist yet.
fn init_schema(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS namespaces (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            namespace_type TEXT NOT NULL DEFAULT 'none'
        );

        CREATE TABLE IF NOT EXISTS module_providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            module TEXT NOT NULL,
            provider TEXT NOT NULL,
            repo_clone_url_template TEXT,
            tag_format TEXT NOT NULL DEFAULT 'v{version}',
            git_path TEXT,
            repo_browse_url_template TEXT,
            verified INTEGER NOT NULL DEFAULT 0,
            UNIQUE (namespace, module, provider)
        );

        -- AUTOINCREMENT so a reindexed version can never reuse the id of
        -- the row it replaced.
        CREATE TABLE IF NOT EXISTS module_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider_id INTEGER NOT NULL REFERENCES module_providers (id) ON DELETE CASCADE,
            version TEXT NOT NULL,
            beta INTEGER NOT NULL DEFAULT 0,
            published INTEGER NOT NULL DEFAULT 0,
            owner TEXT,
            description TEXT,
            git_sha TEXT,
            UNIQUE (provider_id, version)
        );

        CREATE TABLE IF NOT EXISTS module_details (
            module_version_id INTEGER PRIMARY KEY REFERENCES module_versions (id) ON DELETE CASCADE,
            readme TEXT,
            terraform_docs TEXT,
            tfsec TEXT,
            infracost TEXT,
            terraform_graph TEXT,
            terraform_modules TEXT,
            terraform_version TEXT
        );

        CREATE TABLE IF NOT EXISTS submodules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_version_id INTEGER NOT NULL REFERENCES module_versions (id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            UNIQUE (module_version_id, path)
        );

        CREATE TABLE IF NOT EXISTS examples (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_version_id INTEGER NOT NULL REFERENCES module_versions (id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            UNIQUE (module_version_id, path)
        );

        CREATE TABLE IF NOT EXISTS example_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            example_id INTEGER NOT NULL REFERENCES examples (id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            content BLOB NOT NULL,
            UNIQUE (example_id, path)
        );

        CREATE TABLE IF NOT EXISTS module_version_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module_version_id INTEGER NOT NULL REFERENCES module_versions (id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            content BLOB NOT NULL,
            content_type TEXT NOT NULL,
            UNIQUE (module_version_id, path)
        );

        CREATE TABLE IF NOT EXISTS module_provider_redirects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_namespace TEXT NOT NULL,
            from_module TEXT NOT NULL,
            from_provider TEXT NOT NULL,
            to_module_provider_id INTEGER NOT NULL REFERENCES module_providers (id) ON DELETE CASCADE,
            UNIQUE (from_namespace, from_module, from_provider)
        );

        CREATE TABLE IF NOT EXISTS audit_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            subject TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            dispatched_at TEXT
        );
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
