//! Database module for `ChatGemini`
//!
//! Persists threads: an ordered message history plus the current graph
//! checkpoint for each thread id.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Database connection lock poisoned")]
    LockPoisoned,
    #[error("Failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Thread Operations ====================

    /// Register an empty thread with a `Done` checkpoint
    pub fn create_thread(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        ensure_thread(&conn, id, &Utc::now())
    }

    /// Whether a thread with this id exists
    #[cfg(test)]
    pub fn thread_exists(&self, id: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM threads WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    /// Load a thread's history and current checkpoint
    pub fn load(&self, id: &str) -> DbResult<ThreadSnapshot> {
        let conn = self.conn()?;

        let checkpoint: Option<(i64, String)> = conn
            .query_row(
                "SELECT c.step, c.state FROM threads t
                 LEFT JOIN checkpoints c ON c.thread_id = t.id
                 WHERE t.id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                        row.get::<_, Option<String>>(1)?
                            .unwrap_or_else(|| r#"{"type":"done"}"#.to_string()),
                    ))
                },
            )
            .optional()?;
        let Some((step, state_json)) = checkpoint else {
            return Err(DbError::ThreadNotFound(id.to_string()));
        };
        let checkpoint = Checkpoint::new(
            u64::try_from(step).unwrap_or_default(),
            serde_json::from_str(&state_json)?,
        );

        let mut stmt = conn.prepare(
            "SELECT role, content, payload FROM messages
             WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (role, content, payload) = row?;
            history.push(parse_message(&role, content, payload.as_deref())?);
        }

        Ok(ThreadSnapshot {
            history,
            checkpoint,
        })
    }

    /// Persist a thread's history and checkpoint in one transaction.
    ///
    /// The stored history becomes exactly `history`: entries are upserted
    /// by position and anything past its length is removed. Unchanged rows
    /// keep their original `created_at`.
    pub fn save(
        &self,
        id: &str,
        history: &[ChatMessage],
        checkpoint: &Checkpoint,
    ) -> DbResult<()> {
        let mut conn = self.conn()?;
        let now = Utc::now();
        let tx = conn.transaction()?;

        ensure_thread(&tx, id, &now)?;

        let stored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let len = i64::try_from(history.len()).unwrap_or(i64::MAX);
        if stored > len {
            tx.execute(
                "DELETE FROM messages WHERE thread_id = ?1 AND sequence_id > ?2",
                params![id, len],
            )?;
        }

        {
            let mut insert = tx.prepare(
                "INSERT INTO messages (thread_id, sequence_id, role, content, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(thread_id, sequence_id) DO UPDATE SET
                     role = excluded.role,
                     content = excluded.content,
                     payload = excluded.payload
                 WHERE role IS NOT excluded.role
                    OR content IS NOT excluded.content
                    OR payload IS NOT excluded.payload",
            )?;
            for (sequence_id, msg) in (1_i64..).zip(history) {
                let payload = msg.payload.as_ref().map(serde_json::to_string).transpose()?;
                insert.execute(params![
                    id,
                    sequence_id,
                    msg.role.to_string(),
                    msg.content,
                    payload,
                    now.to_rfc3339(),
                ])?;
            }
        }

        write_checkpoint(&tx, id, checkpoint, &now)?;
        tx.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Replace only the current checkpoint of a thread
    pub fn put_checkpoint(&self, id: &str, checkpoint: &Checkpoint) -> DbResult<()> {
        let conn = self.conn()?;
        let now = Utc::now();
        ensure_thread(&conn, id, &now)?;
        write_checkpoint(&conn, id, checkpoint, &now)
    }

    /// All thread ids, most recently updated first
    pub fn list_thread_ids(&self) -> DbResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM threads ORDER BY updated_at DESC, created_at DESC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Thread summaries for the sidebar, most recently updated first
    pub fn list_threads(&self) -> DbResult<Vec<ThreadSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.created_at, t.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.thread_id = t.id) AS message_count,
                    (SELECT m.content FROM messages m
                     WHERE m.thread_id = t.id AND m.role = 'user'
                     ORDER BY m.sequence_id ASC LIMIT 1) AS first_user
             FROM threads t
             ORDER BY t.updated_at DESC, t.created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            let first_user: Option<String> = row.get(4)?;
            Ok(ThreadSummary {
                id: row.get(0)?,
                created_at: parse_datetime(&row.get::<_, String>(1)?),
                updated_at: parse_datetime(&row.get::<_, String>(2)?),
                message_count: row.get(3)?,
                title: first_user.as_deref().and_then(title_from),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Reset every in-flight checkpoint to `Done` on server restart.
    ///
    /// Messages of an interrupted turn were never written, so only the
    /// checkpoint needs repair. Returns the number of threads reset.
    pub fn reset_in_flight_checkpoints(&self) -> DbResult<usize> {
        let conn = self.conn()?;
        let now = Utc::now();
        let done = serde_json::to_string(&GraphState::Done)?;

        let count = conn.execute(
            "UPDATE checkpoints SET state = ?1, step = step + 1, updated_at = ?2
             WHERE json_extract(state, '$.type') != 'done'",
            params![done, now.to_rfc3339()],
        )?;
        Ok(count)
    }
}

fn ensure_thread(conn: &Connection, id: &str, now: &DateTime<Utc>) -> DbResult<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO threads (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![id, now.to_rfc3339()],
    )?;
    if inserted > 0 {
        write_checkpoint(conn, id, &Checkpoint::default(), now)?;
    }
    Ok(())
}

fn write_checkpoint(
    conn: &Connection,
    id: &str,
    checkpoint: &Checkpoint,
    now: &DateTime<Utc>,
) -> DbResult<()> {
    let state = serde_json::to_string(&checkpoint.state)?;
    let step = i64::try_from(checkpoint.step).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT INTO checkpoints (thread_id, step, state, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(thread_id) DO UPDATE SET step = excluded.step, state = excluded.state,
                                              updated_at = excluded.updated_at",
        params![id, step, state, now.to_rfc3339()],
    )?;
    Ok(())
}

fn parse_message(role: &str, content: String, payload: Option<&str>) -> DbResult<ChatMessage> {
    let role = role.parse::<Role>().map_err(DbError::Corrupt)?;
    let payload = payload.map(serde_json::from_str).transpose()?;
    Ok(ChatMessage {
        role,
        content,
        payload,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
