//! Opening the SQLite file and creating the schema.

use std::fs;
use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::StoreError;

/// How long a connection waits on a locked database before giving up. Writers
/// inside this process are serialized, so this only covers outside readers.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection for one unit of work. Callers drop it as soon as the
/// operation finishes.
pub(crate) fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(StoreError::sqlite("open SQLite database"))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(StoreError::sqlite("configure busy timeout"))?;
    Ok(conn)
}

/// Make sure the database file and the `students` table exist. There are no
/// migrations: an existing table is used as-is.
pub(crate) fn ensure_schema(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let conn = open_connection(path)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            course TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            avatar TEXT NOT NULL DEFAULT ''
        )",
        [],
    )
    .map_err(StoreError::sqlite("create students table"))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS students_name_index ON students (name)",
        [],
    )
    .map_err(StoreError::sqlite("create students name index"))?;

    debug!(path = %path.display(), "students schema ready");
    Ok(())
}
