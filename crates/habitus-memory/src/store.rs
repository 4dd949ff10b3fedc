//! Confidence-scored memory store.
//!
//! Persists [`Memory`] records to a local SQLite database and applies the
//! confidence updates that drive the engine's cache-like behavior: memories
//! backed by fresh evidence are reinforced towards `1.0`, unsupported ones are
//! weakened and evicted once they drop below the cleanup threshold.
//!
//! # Storage layout
//!
//! | table             | column       | type      | description                          |
//! |-------------------|--------------|-----------|--------------------------------------|
//! | `memories`        | id           | INTEGER   | autoincrement primary key            |
//! |                   | memory       | TEXT      | natural-language statement           |
//! |                   | confidence   | REAL      | belief in `[0, 1]`, default `0.5`    |
//! |                   | last_updated | TIMESTAMP | RFC-3339 UTC, microsecond precision  |
//! | `tool_executions` | id           | INTEGER   | autoincrement primary key            |
//! |                   | tool         | TEXT      | tool name                            |
//! |                   | arguments    | TEXT      | JSON-encoded arguments (nullable)    |
//! |                   | result       | TEXT      | JSON-encoded result (nullable)       |
//! |                   | context      | TEXT      | free-form context (nullable)         |
//! |                   | timestamp    | DATETIME  | RFC-3339 UTC, microsecond precision  |
//!
//! Timestamps are written with a fixed width so that lexical order equals
//! chronological order inside SQL.
//!
//! # Atomicity
//!
//! Reinforce is a single `UPDATE`; weaken is a conditional `DELETE` followed by
//! a conditional `UPDATE` inside one immediate transaction. Neither reads the
//! confidence into Rust first, so concurrent callers cannot lose updates.
//!
//! # Example
//!
//! ```rust
//! use habitus_memory::{MemoryStore, WeakenOutcome};
//!
//! let store = MemoryStore::open_in_memory().unwrap();
//! let id = store.add_memory("User likes EDM music", 0.5).unwrap();
//!
//! store.reinforce_memory(id, 0.1).unwrap();
//! let m = store.get_memory(id).unwrap().unwrap();
//! assert!((m.confidence - 0.55).abs() < 1e-9);
//!
//! assert_eq!(store.weaken_memory(id, 1.0, 0.1).unwrap(), WeakenOutcome::Deleted);
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use habitus_types::{HabitusError, Memory, MemoryId, MemoryStats};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Confidence assigned to memories created without an explicit value.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Memories at or above this confidence count as "high confidence" in stats.
pub const HIGH_CONFIDENCE: f64 = 0.7;

/// Maximum number of rows returned by [`MemoryStore::search_similar_memories`].
const SEARCH_LIMIT: i64 = 20;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from memory store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid value: {0}")]
    Validation(String),
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<StoreError> for HabitusError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => HabitusError::Validation(msg),
            StoreError::Json(e) => HabitusError::Serialization(e.to_string()),
            other => HabitusError::Storage(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WeakenOutcome
// ─────────────────────────────────────────────────────────────────────────────

/// Result of [`MemoryStore::weaken_memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeakenOutcome {
    /// The new confidence fell below the cleanup threshold; the row is gone.
    Deleted,
    /// The confidence was lowered and the row kept.
    Weakened,
    /// No memory with that id exists.
    NotFound,
}

// ─────────────────────────────────────────────────────────────────────────────
// Timestamp helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Rows written by SQLite's `CURRENT_TIMESTAMP`
/// default (`YYYY-MM-DD HH:MM:SS`) are accepted as UTC.
pub(crate) fn decode_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn validate_confidence(confidence: f64) -> Result<(), StoreError> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "confidence {confidence} is outside [0, 1]"
        )))
    }
}

fn validate_factor(factor: f64) -> Result<f64, StoreError> {
    if factor.is_finite() {
        Ok(factor.clamp(0.0, 1.0))
    } else {
        Err(StoreError::Validation(format!("factor {factor} is not finite")))
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let ts: String = row.get(3)?;
    Ok(Memory {
        id: row.get(0)?,
        text: row.get(1)?,
        confidence: row.get(2)?,
        last_updated: decode_timestamp(3, &ts)?,
    })
}

/// Escape `LIKE` wildcards so query terms match literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed memory store and execution log.
///
/// Cheap to clone: clones share the same connection. Construct one per
/// process at startup and hand clones to every component that needs it.
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Validation(format!("cannot create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened memory store");
        Self::from_connection(conn)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                memory       TEXT NOT NULL,
                confidence   REAL DEFAULT 0.5,
                last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS tool_executions (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                tool      TEXT NOT NULL,
                arguments TEXT,
                result    TEXT,
                context   TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_memories_confidence ON memories(confidence DESC);
            CREATE INDEX IF NOT EXISTS idx_memories_updated ON memories(last_updated DESC);
            CREATE INDEX IF NOT EXISTS idx_tool_executions_tool ON tool_executions(tool);
            CREATE INDEX IF NOT EXISTS idx_tool_executions_timestamp ON tool_executions(timestamp);",
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // -------------------------------------------------------------------------
    // Memories
    // -------------------------------------------------------------------------

    /// Insert a new memory and return its id.
    ///
    /// Returns [`StoreError::Validation`] if `confidence` is outside `[0, 1]`.
    pub fn add_memory(&self, text: &str, confidence: f64) -> Result<MemoryId, StoreError> {
        validate_confidence(confidence)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memories (memory, confidence, last_updated) VALUES (?1, ?2, ?3)",
            params![text, confidence, encode_timestamp(&Utc::now())],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, confidence, "memory created");
        Ok(id)
    }

    /// Insert a new memory with [`DEFAULT_CONFIDENCE`].
    pub fn add_memory_default(&self, text: &str) -> Result<MemoryId, StoreError> {
        self.add_memory(text, DEFAULT_CONFIDENCE)
    }

    /// Return memories with `confidence >= min_confidence`, highest confidence
    /// first, then most recently updated.
    pub fn get_memories(
        &self,
        min_confidence: f64,
        limit: Option<usize>,
    ) -> Result<Vec<Memory>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, memory, confidence, last_updated
             FROM memories
             WHERE confidence >= ?1
             ORDER BY confidence DESC, last_updated DESC, id DESC
             LIMIT ?2",
        )?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![min_confidence, limit], row_to_memory)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fetch a single memory by id.
    pub fn get_memory(&self, id: MemoryId) -> Result<Option<Memory>, StoreError> {
        let conn = self.conn()?;
        let memory = conn
            .query_row(
                "SELECT id, memory, confidence, last_updated FROM memories WHERE id = ?1",
                params![id],
                row_to_memory,
            )
            .optional()?;
        Ok(memory)
    }

    /// Raise a memory's confidence with diminishing returns:
    /// `new = min(1.0, old + factor * (1.0 - old))`.
    ///
    /// `factor` is clamped to `[0, 1]`. Returns `false` if `id` is unknown.
    pub fn reinforce_memory(&self, id: MemoryId, factor: f64) -> Result<bool, StoreError> {
        let factor = validate_factor(factor)?;
        let changed = self.conn()?.execute(
            "UPDATE memories
             SET confidence = MIN(1.0, confidence + ?2 * (1.0 - confidence)),
                 last_updated = ?3
             WHERE id = ?1",
            params![id, factor, encode_timestamp(&Utc::now())],
        )?;
        debug!(id, factor, found = changed > 0, "reinforce");
        Ok(changed > 0)
    }

    /// Lower a memory's confidence: `new = max(0.0, old * (1.0 - factor))`.
    ///
    /// When `new < cleanup_threshold` the memory is deleted in the same
    /// transaction and [`WeakenOutcome::Deleted`] is returned.
    pub fn weaken_memory(
        &self,
        id: MemoryId,
        factor: f64,
        cleanup_threshold: f64,
    ) -> Result<WeakenOutcome, StoreError> {
        let factor = validate_factor(factor)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted = tx.execute(
            "DELETE FROM memories
             WHERE id = ?1 AND MAX(0.0, confidence * (1.0 - ?2)) < ?3",
            params![id, factor, cleanup_threshold],
        )?;
        let outcome = if deleted > 0 {
            WeakenOutcome::Deleted
        } else {
            let updated = tx.execute(
                "UPDATE memories
                 SET confidence = MAX(0.0, confidence * (1.0 - ?2)),
                     last_updated = ?3
                 WHERE id = ?1",
                params![id, factor, encode_timestamp(&Utc::now())],
            )?;
            if updated > 0 {
                WeakenOutcome::Weakened
            } else {
                WeakenOutcome::NotFound
            }
        };
        tx.commit()?;
        debug!(id, factor, cleanup_threshold, ?outcome, "weaken");
        Ok(outcome)
    }

    /// Replace a memory's text and refresh `last_updated`; confidence is kept.
    pub fn update_memory_content(&self, id: MemoryId, new_text: &str) -> Result<bool, StoreError> {
        let changed = self.conn()?.execute(
            "UPDATE memories SET memory = ?2, last_updated = ?3 WHERE id = ?1",
            params![id, new_text, encode_timestamp(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Overwrite a memory's confidence.
    ///
    /// Values outside `[0, 1]` are rejected before anything is written.
    pub fn set_confidence(&self, id: MemoryId, confidence: f64) -> Result<bool, StoreError> {
        validate_confidence(confidence)?;
        let changed = self.conn()?.execute(
            "UPDATE memories SET confidence = ?2, last_updated = ?3 WHERE id = ?1",
            params![id, confidence, encode_timestamp(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    /// Permanently remove a memory. Returns `false` if `id` is unknown.
    pub fn delete_memory(&self, id: MemoryId) -> Result<bool, StoreError> {
        let changed = self
            .conn()?
            .execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Case-insensitive substring match of each whitespace-separated term in
    /// `query` against memory text (any term may match).
    ///
    /// This is a cheap heuristic for a memory set of tens to low hundreds of
    /// rows, not semantic search.
    pub fn search_similar_memories(
        &self,
        query: &str,
        min_confidence: f64,
    ) -> Result<Vec<Memory>, StoreError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| format!("%{}%", escape_like(&t.to_lowercase())))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let like_clause = (0..terms.len())
            .map(|i| format!("LOWER(memory) LIKE ?{} ESCAPE '\\'", i + 2))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT id, memory, confidence, last_updated
             FROM memories
             WHERE confidence >= ?1 AND ({like_clause})
             ORDER BY confidence DESC, last_updated DESC, id DESC
             LIMIT {SEARCH_LIMIT}"
        );

        let mut values: Vec<rusqlite::types::Value> = Vec::with_capacity(terms.len() + 1);
        values.push(min_confidence.into());
        values.extend(terms.into_iter().map(rusqlite::types::Value::from));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_memory)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Bulk-delete every memory with `confidence < threshold` and return how
    /// many were removed.
    pub fn cleanup_low_confidence_memories(&self, threshold: f64) -> Result<usize, StoreError> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM memories WHERE confidence < ?1", params![threshold])?;
        if deleted > 0 {
            info!(deleted, threshold, "cleaned up low-confidence memories");
        }
        Ok(deleted)
    }

    /// Aggregate figures over the memory table.
    pub fn get_memory_stats(&self) -> Result<MemoryStats, StoreError> {
        let conn = self.conn()?;
        let (total, avg, high): (i64, Option<f64>, i64) = conn.query_row(
            "SELECT COUNT(*),
                    AVG(confidence),
                    COUNT(CASE WHEN confidence >= ?1 THEN 1 END)
             FROM memories",
            params![HIGH_CONFIDENCE],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let avg = avg.unwrap_or(0.0);
        Ok(MemoryStats {
            total_memories: total as u64,
            average_confidence: (avg * 1000.0).round() / 1000.0,
            high_confidence_memories: high as u64,
        })
    }

    /// Delete every memory and execution and reset both id sequences.
    pub fn clear_all_data(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "BEGIN;
             DELETE FROM memories;
             DELETE FROM tool_executions;
             DELETE FROM sqlite_sequence WHERE name IN ('memories', 'tool_executions');
             COMMIT;",
        )?;
        info!("memory store cleared");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
