//! SQLite implementation of [`Hive`].
//!
//! [`SqliteHive`] keeps the key tree in a single database file so published
//! records survive process restarts. Key creation runs in one transaction;
//! each value write is a single upsert statement, which gives the per-value
//! atomicity the store relies on.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, trace};

use crate::hive::{key_name, lineage, parent_path, HandleTable, Hive, HiveFailure, RawHandle};

/// SQLite-backed implementation of [`Hive`].
#[derive(Debug)]
pub struct SqliteHive {
    conn: Mutex<Connection>,
    handles: HandleTable,
}

impl SqliteHive {
    /// Opens (or creates) a hive database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HiveFailure> {
        let path = path.as_ref();
        let conn = crate::schema::open_database(path)?;
        debug!(path = %path.display(), "opened sqlite hive");
        Ok(SqliteHive::from_connection(conn))
    }

    /// Opens an existing hive database for reading. Every write through
    /// the returned hive fails with [`HiveFailure::AccessDenied`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, HiveFailure> {
        let path = path.as_ref();
        let conn = crate::schema::open_database_read_only(path)?;
        debug!(path = %path.display(), "opened sqlite hive read-only");
        Ok(SqliteHive::from_connection(conn))
    }

    /// Opens an in-memory hive database (for testing).
    pub fn in_memory() -> Result<Self, HiveFailure> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteHive::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        SqliteHive {
            conn: Mutex::new(conn),
            handles: HandleTable::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_exists(conn: &Connection, path: &str) -> Result<bool, HiveFailure> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM hive_keys WHERE path = ?1)",
            params![path],
            |row| row.get(0),
        )
        .map_err(|e| sqlite_failure(e, path))
    }

    /// Resolves a handle and checks its key still exists.
    fn existing_path(&self, conn: &Connection, handle: RawHandle) -> Result<String, HiveFailure> {
        let path = self.handles.path(handle)?;
        if !Self::key_exists(conn, &path)? {
            return Err(HiveFailure::NotFound { path });
        }
        Ok(path)
    }
}

impl Hive for SqliteHive {
    fn open_key(&self, base: Option<RawHandle>, path: &str) -> Result<RawHandle, HiveFailure> {
        let path = self.handles.resolve(base, path)?;
        if !Self::key_exists(&self.lock(), &path)? {
            return Err(HiveFailure::NotFound { path });
        }
        trace!(path = %path, "open key");
        Ok(self.handles.insert(path))
    }

    fn create_key(&self, base: Option<RawHandle>, path: &str) -> Result<RawHandle, HiveFailure> {
        let path = self.handles.resolve(base, path)?;
        {
            let mut conn = self.lock();
            let tx = conn.transaction().map_err(|e| sqlite_failure(e, &path))?;
            {
                let mut stmt = tx
                    .prepare_cached("INSERT OR IGNORE INTO hive_keys (path, parent) VALUES (?1, ?2)")
                    .map_err(|e| sqlite_failure(e, &path))?;
                for key in lineage(&path) {
                    stmt.execute(params![key, parent_path(key).unwrap_or_default()])
                        .map_err(|e| sqlite_failure(e, key))?;
                }
            }
            tx.commit().map_err(|e| sqlite_failure(e, &path))?;
        }
        trace!(path = %path, "open or create key");
        Ok(self.handles.insert(path))
    }

    fn close_key(&self, handle: RawHandle) {
        if self.handles.remove(handle) {
            trace!(%handle, "closed key");
        }
    }

    fn set_value(&self, handle: RawHandle, name: &str, data: &[u8]) -> Result<(), HiveFailure> {
        let conn = self.lock();
        let path = self.existing_path(&conn, handle)?;
        conn.execute(
            "INSERT INTO hive_values (key_path, name, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(key_path, name) DO UPDATE SET data = excluded.data",
            params![path, name, data],
        )
        .map_err(|e| sqlite_failure(e, &path))?;
        Ok(())
    }

    fn query_value(&self, handle: RawHandle, name: &str) -> Result<Option<Vec<u8>>, HiveFailure> {
        let conn = self.lock();
        let path = self.existing_path(&conn, handle)?;
        conn.query_row(
            "SELECT data FROM hive_values WHERE key_path = ?1 AND name = ?2",
            params![path, name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| sqlite_failure(e, &path))
    }

    fn subkeys(&self, handle: RawHandle) -> Result<Vec<String>, HiveFailure> {
        let conn = self.lock();
        let path = self.existing_path(&conn, handle)?;
        let mut stmt = conn
            .prepare_cached("SELECT path FROM hive_keys WHERE parent = ?1 ORDER BY path")
            .map_err(|e| sqlite_failure(e, &path))?;
        let rows = stmt
            .query_map(params![path], |row| row.get::<_, String>(0))
            .map_err(|e| sqlite_failure(e, &path))?;

        let mut names = Vec::new();
        for row in rows {
            let child = row.map_err(|e| sqlite_failure(e, &path))?;
            names.push(key_name(&child).to_string());
        }
        names.sort();
        Ok(names)
    }

    fn values(&self, handle: RawHandle) -> Result<Vec<(String, Vec<u8>)>, HiveFailure> {
        let conn = self.lock();
        let path = self.existing_path(&conn, handle)?;
        let mut stmt = conn
            .prepare_cached("SELECT name, data FROM hive_values WHERE key_path = ?1 ORDER BY name")
            .map_err(|e| sqlite_failure(e, &path))?;
        let rows = stmt
            .query_map(params![path], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| sqlite_failure(e, &path))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| sqlite_failure(e, &path))
    }

    fn open_handle_count(&self) -> usize {
        self.handles.len()
    }
}

/// Translates a SQLite error into the hive's failure vocabulary.
pub(crate) fn sqlite_failure(err: rusqlite::Error, path: &str) -> HiveFailure {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        match inner.code {
            ErrorCode::DiskFull | ErrorCode::OutOfMemory | ErrorCode::TooBig => {
                return HiveFailure::QuotaExceeded;
            }
            ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied
            | ErrorCode::AuthorizationForStatementDenied => {
                return HiveFailure::AccessDenied {
                    path: path.to_string(),
                };
            }
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                return HiveFailure::Corrupt {
                    reason: err.to_string(),
                };
            }
            _ => {}
        }
    }
    HiveFailure::Io {
        reason: format!("'{path}': {err}"),
    }
}
