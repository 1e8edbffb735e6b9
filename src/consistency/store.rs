//! SQLite bounding-box index backing tile consistency.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags, params};

use super::ConsistencyError;
use crate::geometry::Rect;

const BUSY_TIMEOUT_MS: u64 = 5_000;

/// One workspace's `bbox` table.
#[derive(Debug)]
pub struct BboxStore {
    conn: Connection,
    path: PathBuf,
}

impl BboxStore {
    pub fn open(path: &Path) -> Result<Self, ConsistencyError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            return Err(ConsistencyError::Io {
                path: parent.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "workspace directory does not exist",
                ),
            });
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the single transaction a tile is resolved in. Dropping the
    /// returned handle without committing rolls back.
    pub fn begin(&mut self) -> Result<BboxTxn<'_>, ConsistencyError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(BboxTxn {
            conn: &self.conn,
            finished: false,
        })
    }

    pub fn record_count(&self, level: u32) -> Result<usize, ConsistencyError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bbox WHERE level = ?1",
            params![level],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    pub fn keys(&self, level: u32) -> Result<Vec<String>, ConsistencyError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM bbox WHERE level = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![level], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }
}

/// Outcome of recording a placed box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key was already recorded at this level.
    AlreadyPresent,
}

pub struct BboxTxn<'a> {
    conn: &'a Connection,
    finished: bool,
}

impl BboxTxn<'_> {
    /// Keys of every box at `level` that intersects `rect`, edges included.
    pub fn intersecting_keys(&self, level: u32, rect: &Rect) -> Result<Vec<String>, ConsistencyError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT key FROM bbox
             WHERE level = ?1 AND xmin <= ?4 AND xmax >= ?2 AND ymin <= ?5 AND ymax >= ?3",
        )?;
        let rows = stmt.query_map(
            params![level, rect.x, rect.y, rect.x_max(), rect.y_max()],
            |row| row.get::<_, String>(0),
        )?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    pub fn insert(&self, key: &str, level: u32, rect: &Rect) -> Result<InsertOutcome, ConsistencyError> {
        let result = self.conn.execute(
            "INSERT INTO bbox (key, level, xmin, ymin, xmax, ymax) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![key, level, rect.x, rect.y, rect.x_max(), rect.y_max()],
        );
        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                Ok(InsertOutcome::AlreadyPresent)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// A failed `COMMIT` leaves the handle unfinished, so dropping it
    /// rolls the transaction back.
    pub fn commit(mut self) -> Result<(), ConsistencyError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<(), ConsistencyError> {
        self.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for BboxTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn initialize_schema(conn: &Connection) -> Result<(), ConsistencyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bbox (
           key TEXT NOT NULL,
           level INTEGER NOT NULL,
           xmin REAL NOT NULL,
           ymin REAL NOT NULL,
           xmax REAL NOT NULL,
           ymax REAL NOT NULL,
           PRIMARY KEY (key, level)
         );
         CREATE INDEX IF NOT EXISTS bbox_by_level_x ON bbox (level, xmin, xmax);",
    )?;
    Ok(())
}
