use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection};

use super::error::{LedgerError, LedgerResult};
use super::models::ProcessedImage;

/// Durable record of every image the engine has ever finalized.
///
/// Backed by one SQLite file per run directory, opened by a single logical
/// writer. Every mutating operation is a single statement, so a process
/// crash leaves each row either fully applied or absent.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// Open (or create) the ledger at the given path
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;

        // Set pragmas for durability under crash
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 10000;",
        )
        .map_err(|e| LedgerError::Initialization(format!("failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS processed_images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                user TEXT NOT NULL,
                filename TEXT NOT NULL,
                path TEXT NOT NULL,
                duplicates INTEGER NOT NULL,
                main_double TEXT NOT NULL,
                enhanced_path TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_processed_filename
                ON processed_images(filename);

            CREATE TABLE IF NOT EXISTS comparison_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                against TEXT NOT NULL,
                score REAL NOT NULL,
                timestamp TEXT NOT NULL
            );",
        )
        .map_err(|e| LedgerError::Initialization(format!("failed to create schema: {}", e)))?;

        info!("Ledger opened at {}", path.display());
        Ok(Self { conn })
    }

    /// Insert a new record, returning its id
    pub fn append(&self, record: &ProcessedImage) -> LedgerResult<i64> {
        self.conn.execute(
            "INSERT INTO processed_images
                (timestamp, user, filename, path, duplicates, main_double, enhanced_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.timestamp.to_rfc3339(),
                record.user,
                record.filename,
                path_to_text(&record.path),
                record.duplicates,
                record.main_double,
                record.enhanced_path,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every record, in insertion order
    pub fn list_all(&self) -> LedgerResult<Vec<ProcessedImage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, user, filename, path, duplicates, main_double, enhanced_path
             FROM processed_images ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// The most recently appended record, by insertion order (not by
    /// timestamp, which may tie)
    pub fn last(&self) -> LedgerResult<Option<ProcessedImage>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, user, filename, path, duplicates, main_double, enhanced_path
             FROM processed_images ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], row_to_record)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Update exactly the `path` field of one record.
    ///
    /// Returns false, leaving state unchanged, when the id does not exist.
    pub fn update_path(&self, id: i64, new_path: &Path) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE processed_images SET path = ?1 WHERE id = ?2",
            params![path_to_text(new_path), id],
        )?;
        Ok(changed > 0)
    }

    /// Delete records whose id falls within the inclusive range.
    ///
    /// Returns false (no-op) when the range does not intersect existing ids.
    pub fn purge_range(&self, start: i64, end: i64) -> LedgerResult<bool> {
        let bounds: Option<(Option<i64>, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT MIN(id), MAX(id) FROM processed_images",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        let Some((Some(first), Some(last))) = bounds else {
            return Ok(false);
        };
        if start > last || end < first {
            return Ok(false);
        }

        self.conn.execute(
            "DELETE FROM processed_images WHERE id >= ?1 AND id <= ?2",
            params![start, end],
        )?;
        Ok(true)
    }

    /// Record a similarity score for offline threshold tuning
    pub fn record_score(&self, filename: &str, against: &str, score: f64) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO comparison_scores (filename, against, score, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![filename, against, score, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Recorded comparison scores, in insertion order
    pub fn comparison_scores(&self) -> LedgerResult<Vec<(String, String, f64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT filename, against, score FROM comparison_scores ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
        let mut scores = Vec::new();
        for row in rows {
            scores.push(row?);
        }
        Ok(scores)
    }
}

fn path_to_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessedImage> {
    let timestamp_text: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp_text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let path_text: String = row.get(4)?;

    Ok(ProcessedImage {
        id: Some(row.get(0)?),
        timestamp,
        user: row.get(2)?,
        filename: row.get(3)?,
        path: PathBuf::from(path_text),
        duplicates: row.get(5)?,
        main_double: row.get(6)?,
        enhanced_path: row.get(7)?,
    })
}
