//! SQLite persistence for localvol.
//!
//! A single `local_volumes` table holds every volume ever created. Rows are
//! soft-deleted so the history stays available for audit.

mod schema;
mod volumes;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, params};

use localvol_shared::errors::{LocalvolError, LocalvolResult};

pub use volumes::{ProjectUsage, VolumeStore};

/// Map a rusqlite result into `LocalvolError::Database`.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| LocalvolError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// Applied to file-backed databases only.
const FILE_PRAGMAS: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=FULL;
    PRAGMA busy_timeout=100000;
";

/// Shared handle to one SQLite connection.
///
/// Cloning shares the connection. Stores such as [`VolumeStore`] wrap it.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database at `db_path`, creating it and its parent directory if
    /// needed.
    pub fn open(db_path: &Path) -> LocalvolResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = db_err!(Connection::open(db_path))?;
        db_err!(conn.execute_batch(FILE_PRAGMAS))?;
        tracing::debug!(path = %db_path.display(), "Opened database");
        Self::from_connection(conn)
    }

    /// Private in-memory database, gone when the last clone drops.
    pub fn open_in_memory() -> LocalvolResult<Self> {
        Self::from_connection(db_err!(Connection::open_in_memory())?)
    }

    fn from_connection(conn: Connection) -> LocalvolResult<Self> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }
        check_schema_version(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Record the schema version on first use and refuse databases written by a
/// newer localvol.
fn check_schema_version(conn: &Connection) -> LocalvolResult<()> {
    let stored: Option<i32> = db_err!(
        conn.query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()
    )?;

    match stored {
        None => {
            db_err!(conn.execute(
                "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                params![schema::SCHEMA_VERSION, Utc::now().to_rfc3339()],
            ))?;
            tracing::info!(version = schema::SCHEMA_VERSION, "Initialized database schema");
            Ok(())
        }
        Some(version) if version > schema::SCHEMA_VERSION => Err(LocalvolError::Database(format!(
            "database schema version {} is newer than supported {}",
            version,
            schema::SCHEMA_VERSION
        ))),
        Some(_) => Ok(()),
    }
}
