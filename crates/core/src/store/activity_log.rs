//! Append-only durable log of activity transitions, backed by SQLite.
//!
//! The pipeline appends a record whenever a loggable track's activity
//! changes, plus a slower periodic flush of unchanged activities; the query
//! interface reads it back filtered and paginated.

use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogStoreError {
    #[error("failed to create database directory {0}")]
    Dir(#[source] std::io::Error),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// One activity-log row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub track_id: u64,
    #[serde(rename = "class")]
    pub class_name: String,
    pub activity: String,
    pub confidence: f64,
    /// ISO seconds, local time: `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
}

/// Filters and pagination for log reads.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub limit: u32,
    pub offset: u32,
    pub class_filter: Option<String>,
    pub activity_filter: Option<String>,
    pub camera_id: Option<String>,
}

/// SQLite-backed activity log.
///
/// The connection sits behind a mutex: the worker thread appends while the
/// query side reads, and SQLite connections are not Sync.
pub struct ActivityLogStore {
    conn: Mutex<Connection>,
}

impl ActivityLogStore {
    /// Open (creating directories, file, and schema as needed).
    pub fn open(path: &Path) -> Result<Self, LogStoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(LogStoreError::Dir)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// An in-memory store for tests.
    pub fn in_memory() -> Result<Self, LogStoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), LogStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id INTEGER NOT NULL,
                class TEXT NOT NULL,
                activity TEXT NOT NULL,
                confidence REAL NOT NULL,
                timestamp TEXT NOT NULL,
                camera_id TEXT
            );",
        )?;

        // Older databases predate the camera_id column.
        let mut stmt = conn.prepare("PRAGMA table_info(logs)")?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        if !columns.iter().any(|c| c == "camera_id") {
            log::info!("Adding camera_id column to logs table");
            conn.execute("ALTER TABLE logs ADD COLUMN camera_id TEXT", [])?;
        }
        Ok(())
    }

    /// Append one record. `timestamp` defaults to the current local time
    /// in ISO seconds.
    pub fn log_activity(
        &self,
        track_id: u64,
        class_name: &str,
        activity: &str,
        confidence: f64,
        timestamp: Option<String>,
        camera_id: Option<&str>,
    ) -> Result<(), LogStoreError> {
        let timestamp =
            timestamp.unwrap_or_else(|| Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO logs (track_id, class, activity, confidence, timestamp, camera_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![track_id, class_name, activity, confidence, timestamp, camera_id],
        )?;
        Ok(())
    }

    /// Read records matching the query, newest first (timestamp desc, then
    /// id desc so same-second records keep insertion order reversed).
    pub fn get_logs(&self, query: &LogQuery) -> Result<Vec<LogRecord>, LogStoreError> {
        let (where_clause, params) = build_filters(query);
        let sql = format!(
            "SELECT id, track_id, class, activity, confidence, timestamp, camera_id
             FROM logs WHERE 1=1{where_clause}
             ORDER BY timestamp DESC, id DESC LIMIT ?{} OFFSET ?{}",
            params.len() + 1,
            params.len() + 2,
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;

        let mut bound: Vec<Box<dyn rusqlite::types::ToSql>> = params
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn rusqlite::types::ToSql>)
            .collect();
        bound.push(Box::new(query.limit));
        bound.push(Box::new(query.offset));

        let rows = stmt.query_map(
            rusqlite::params_from_iter(bound.iter().map(|b| b.as_ref())),
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    track_id: row.get(1)?,
                    class_name: row.get(2)?,
                    activity: row.get(3)?,
                    confidence: row.get(4)?,
                    timestamp: row.get(5)?,
                    camera_id: row.get(6)?,
                })
            },
        )?;

        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Total record count under the query's filters (pagination ignored).
    pub fn count(&self, query: &LogQuery) -> Result<u64, LogStoreError> {
        let (where_clause, params) = build_filters(query);
        let sql = format!("SELECT COUNT(*) FROM logs WHERE 1=1{where_clause}");

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let count: i64 = stmt.query_row(
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Cheap connectivity probe for health checks.
    pub fn ping(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

fn build_filters(query: &LogQuery) -> (String, Vec<String>) {
    let mut clause = String::new();
    let mut params = Vec::new();

    if let Some(ref class) = query.class_filter {
        params.push(class.clone());
        clause.push_str(&format!(" AND class = ?{}", params.len()));
    }
    if let Some(ref activity) = query.activity_filter {
        params.push(activity.clone());
        clause.push_str(&format!(" AND activity = ?{}", params.len()));
    }
    if let Some(ref camera) = query.camera_id {
        params.push(camera.clone());
        clause.push_str(&format!(" AND camera_id = ?{}", params.len()));
    }

    (clause, params)
}
