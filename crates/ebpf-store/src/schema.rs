//! SQL schema and migration setup for the SQLite hive.
//!
//! Uses `rusqlite_migration` to manage schema migrations via SQLite's
//! `user_version` pragma. Migrations are embedded at compile time via
//! `include_str!`.

use std::path::Path;

use rusqlite::{Connection, ErrorCode, OpenFlags};
use rusqlite_migration::{Migrations, M};

use crate::hive::HiveFailure;
use crate::sqlite::sqlite_failure;

/// Migration scripts in order. The schema version of a fully migrated
/// database is the number of entries.
const MIGRATION_SCRIPTS: &[&str] = &[
    include_str!("migrations/001_initial_schema.sql"),
    // Future migrations added here.
];

/// All schema migrations, applied in order via `user_version` tracking.
fn migrations() -> Migrations<'static> {
    Migrations::new(MIGRATION_SCRIPTS.iter().copied().map(M::up).collect())
}

/// Opens (or creates) a hive database at `path` with WAL mode, foreign keys,
/// and all pending migrations applied.
pub fn open_database(path: &Path) -> Result<Connection, HiveFailure> {
    let mut conn = Connection::open(path).map_err(|e| open_failure(path, e))?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// Opens an existing hive database without write access.
///
/// Nothing is created or migrated: a missing file is
/// [`HiveFailure::NotFound`] and a file at any other schema version is
/// [`HiveFailure::Corrupt`].
pub fn open_database_read_only(path: &Path) -> Result<Connection, HiveFailure> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| match &e {
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::CannotOpen => {
            HiveFailure::NotFound {
                path: path.display().to_string(),
            }
        }
        _ => open_failure(path, e),
    })?;

    let display = path.display().to_string();
    let version: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| sqlite_failure(e, &display))?;
    if version != MIGRATION_SCRIPTS.len() as i64 {
        return Err(HiveFailure::Corrupt {
            reason: format!(
                "'{display}' has schema version {version}, expected {}",
                MIGRATION_SCRIPTS.len()
            ),
        });
    }
    Ok(conn)
}

/// Opens an in-memory hive database with all pending migrations applied.
pub fn open_in_memory() -> Result<Connection, HiveFailure> {
    let mut conn = Connection::open_in_memory().map_err(|e| HiveFailure::Io {
        reason: e.to_string(),
    })?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// Configures pragmas and applies pending migrations.
fn configure_and_migrate(conn: &mut Connection) -> Result<(), HiveFailure> {
    let pragma_failure = |e: rusqlite::Error| HiveFailure::Io {
        reason: format!("configuring hive database: {e}"),
    };
    // WAL keeps readers off the writer's lock; each value write is its own
    // transaction either way.
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(pragma_failure)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(pragma_failure)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(pragma_failure)?;

    migrations()
        .to_latest(conn)
        .map_err(|e| HiveFailure::Corrupt {
            reason: format!("hive schema migration failed: {e}"),
        })?;

    Ok(())
}

fn open_failure(path: &Path, err: rusqlite::Error) -> HiveFailure {
    HiveFailure::Io {
        reason: format!("opening hive '{}': {err}", path.display()),
    }
}
