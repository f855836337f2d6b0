use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::{hrm_rows, CommitMetadata, StorageSink};
use crate::errors::StorageError;
use crate::heart_rate::Reading;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS hrm (
        timestamp INTEGER,
        heart_rate INTEGER,
        rr_interval INTEGER
    );
    CREATE TABLE IF NOT EXISTS commit_metadata (
        timestamp INTEGER,
        commit_duration REAL,
        commit_every INTEGER
    );
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Hrm,
    CommitMetadata,
}

/// SQLite backed sink. A transaction is kept open between commits,
/// so inserts are cheap and only `commit` touches the disk.
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let sink = Self::init(Connection::open(path)?)?;
        info!("Opened database {}", path.display());
        Ok(sink)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch("BEGIN")?;
        Ok(Self { conn })
    }

    /// Number of rows in `table`, including uncommitted ones.
    pub fn count_rows(&self, table: Table) -> Result<i64, StorageError> {
        let query = match table {
            Table::Hrm => "SELECT COUNT(*) FROM hrm",
            Table::CommitMetadata => "SELECT COUNT(*) FROM commit_metadata",
        };
        let count = self.conn.query_row(query, [], |row| row.get(0))?;
        Ok(count)
    }
}

impl StorageSink for SqliteSink {
    fn insert_reading(&mut self, reading: &Reading) -> Result<(), StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("INSERT INTO hrm (timestamp, heart_rate, rr_interval) VALUES (?1, ?2, ?3)")?;
        for row in hrm_rows(reading) {
            stmt.execute(params![row.timestamp, row.heart_rate, row.rr_interval])?;
        }
        Ok(())
    }

    fn insert_commit_metadata(&mut self, metadata: &CommitMetadata) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO commit_metadata (timestamp, commit_duration, commit_every) VALUES (?1, ?2, ?3)",
            params![
                metadata.timestamp,
                metadata.commit_duration,
                metadata.commit_every
            ],
        )?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("COMMIT; BEGIN")?;
        debug!("SQLite commit done");
        Ok(())
    }
}
