//! SQLite record sink
//!
//! One row per record; field values are stored as a JSON object so any
//! schema fits the same table.

use crate::output::traits::{RecordBatch, Sink, SinkResult};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;

/// SQL schema for the record table
pub const RECORDS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema TEXT NOT NULL,
    source TEXT NOT NULL,
    fields TEXT NOT NULL,
    extracted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_schema ON records(schema);
CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
"#;

/// SQLite-based record sink
pub struct SqliteSink {
    name: String,
    conn: Connection,
}

impl SqliteSink {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `name` - Sink name
    /// * `path` - Path to the SQLite database file
    pub fn open(name: impl Into<String>, path: &Path) -> SinkResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.execute_batch(RECORDS_SQL)?;

        Ok(Self {
            name: name.into(),
            conn,
        })
    }

    /// Creates an in-memory database
    pub fn in_memory(name: impl Into<String>) -> SinkResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(RECORDS_SQL)?;
        Ok(Self {
            name: name.into(),
            conn,
        })
    }

    /// Number of stored records, optionally for one schema
    pub fn count(&self, schema: Option<&str>) -> SinkResult<u64> {
        let count: i64 = match schema {
            Some(schema) => self.conn.query_row(
                "SELECT COUNT(*) FROM records WHERE schema = ?1",
                params![schema],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

impl Sink for SqliteSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, batch: &RecordBatch) -> SinkResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO records (schema, source, fields, extracted_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in &batch.records {
                let fields = serde_json::to_string(&record.fields_json())?;
                stmt.execute(params![record.schema, record.source, fields, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn close(&mut self) -> SinkResult<()> {
        self.conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }
}
