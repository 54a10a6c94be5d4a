//! Downstream sinks for snapshot records
//!
//! The reporter only knows the `SnapshotSink` trait. Two backends ship with
//! the crate: JSONL (one record per line) and SQLite (latest value per
//! category plus an append-only history).

use super::types::SnapshotRecord;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tokio::sync::Mutex;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    Closed(String),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Database(e) => write!(f, "Database error: {}", e),
            SinkError::Closed(e) => write!(f, "Sink closed: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// Downstream publish target for snapshot records
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Publish one record
    async fn emit(&self, record: &SnapshotRecord) -> Result<(), SinkError>;

    /// Flush anything buffered; called once at the end of every report tick
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Appends snapshot records to a JSONL file
pub struct JsonlSnapshotSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSnapshotSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        log::info!("📝 Writing snapshot records to: {}", path.display());

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl SnapshotSink for JsonlSnapshotSink {
    async fn emit(&self, record: &SnapshotRecord) -> Result<(), SinkError> {
        let json = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.writer.lock().await.flush()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}

/// Writes snapshot records to SQLite
///
/// - `category_snapshots`: UPSERT on category (latest counters)
/// - `snapshot_history`: INSERT (append-only)
pub struct SqliteSnapshotSink {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotSink {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SinkError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("Failed to create database directory {}: {}", parent.display(), e),
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// In-memory database (tests, dry runs)
    pub fn in_memory() -> Result<Self, SinkError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SinkError> {
        // In-memory databases report "memory" here, which is fine
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS category_snapshots (
                category TEXT PRIMARY KEY,
                crossed_count INTEGER NOT NULL,
                occupancy_count INTEGER NOT NULL,
                owner_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshot_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                crossed_count INTEGER NOT NULL,
                occupancy_count INTEGER NOT NULL,
                owner_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_history_category_ts ON snapshot_history(category, timestamp DESC)",
            [],
        )?;

        log::info!("✅ SQLite snapshot tables initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Latest counters stored for a category: (crossed, occupancy)
    pub async fn latest(&self, category: &str) -> Result<Option<(u64, i64)>, SinkError> {
        let conn = self.conn.lock().await;
        let latest = conn
            .query_row(
                "SELECT crossed_count, occupancy_count FROM category_snapshots WHERE category = ?1",
                params![category],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(latest.map(|(crossed, occupancy)| (crossed as u64, occupancy)))
    }

    /// Number of history rows for a category
    pub async fn history_len(&self, category: &str) -> Result<usize, SinkError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshot_history WHERE category = ?1",
            params![category],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl SnapshotSink for SqliteSnapshotSink {
    async fn emit(&self, record: &SnapshotRecord) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().await;
        let ts = record.timestamp.timestamp();
        let crossed = record.crossed_count as i64;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO category_snapshots (category, crossed_count, occupancy_count, owner_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(category) DO UPDATE SET
                crossed_count = excluded.crossed_count,
                occupancy_count = excluded.occupancy_count,
                owner_id = excluded.owner_id,
                updated_at = excluded.updated_at",
            params![record.category, crossed, record.occupancy_count, record.owner_id, ts],
        )?;
        tx.execute(
            "INSERT INTO snapshot_history (category, crossed_count, occupancy_count, owner_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.category, crossed, record.occupancy_count, record.owner_id, ts],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
