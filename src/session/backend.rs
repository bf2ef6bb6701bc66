//! Durable storage for session records.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::Value;

use super::SessionError;

/// A session as it is kept in memory and on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: String,
    pub data: HashMap<String, Value>,
    pub expires_at: DateTime<Utc>,
}

impl StoredSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Where persisted sessions live.
///
/// Calls are synchronous and short; the store makes them on the request
/// path only when a session is dirty or its stored expiry lags behind.
pub trait SessionBackend: Send + Sync {
    /// Every record that has not expired at `now`.
    fn load_active(&self, now: DateTime<Utc>) -> Result<Vec<StoredSession>, SessionError>;

    /// Insert or replace a record.
    fn save(&self, session: &StoredSession) -> Result<(), SessionError>;

    /// Move a record's expiry without rewriting its data. Unknown ids are
    /// ignored.
    fn touch(&self, id: &str, expires_at: DateTime<Utc>) -> Result<(), SessionError>;

    /// Remove a record. Removing an unknown id is not an error.
    fn delete(&self, id: &str) -> Result<(), SessionError>;

    /// Bulk-delete records expired at `now`; returns how many went.
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError>;
}

impl From<rusqlite::Error> for SessionError {
    fn from(e: rusqlite::Error) -> Self {
        SessionError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Persistence(e.to_string())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    expires INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires);
";

/// SQLite-backed session table. `expires` holds Unix milliseconds.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, SessionError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SessionError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SessionBackend for SqliteBackend {
    fn load_active(&self, now: DateTime<Utc>) -> Result<Vec<StoredSession>, SessionError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, data, expires FROM sessions WHERE expires > ?1")?;
        let rows = stmt.query_map(params![now.timestamp_millis()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, data, expires) = row?;
            // One corrupt row should not take the others down with it.
            let data = match serde_json::from_str(&data) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping unreadable session row");
                    continue;
                }
            };
            let Some(expires_at) = Utc.timestamp_millis_opt(expires).single() else {
                tracing::warn!(session_id = %id, expires, "Skipping session row with bad expiry");
                continue;
            };
            sessions.push(StoredSession {
                id,
                data,
                expires_at,
            });
        }
        Ok(sessions)
    }

    fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        let data = serde_json::to_string(&session.data)?;
        self.conn.lock().execute(
            "INSERT INTO sessions (id, data, expires) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                expires = excluded.expires,
                updated_at = CURRENT_TIMESTAMP",
            params![session.id, data, session.expires_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn touch(&self, id: &str, expires_at: DateTime<Utc>) -> Result<(), SessionError> {
        self.conn.lock().execute(
            "UPDATE sessions SET expires = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![id, expires_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.conn
            .lock()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM sessions WHERE expires <= ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }
}

/// In-process backend for tests and ephemeral deployments.
///
/// Counts writes and can be told to fail them.
#[derive(Default)]
pub struct MemoryBackend {
    rows: Mutex<HashMap<String, StoredSession>>,
    writes: AtomicUsize,
    touches: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of successful expiry-only updates so far.
    pub fn touch_count(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    /// Stored expiry of `id`, if the row exists.
    pub fn expires_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.rows.lock().get(id).map(|s| s.expires_at)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }
}

impl SessionBackend for MemoryBackend {
    fn load_active(&self, now: DateTime<Utc>) -> Result<Vec<StoredSession>, SessionError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|s| !s.is_expired(now))
            .cloned()
            .collect())
    }

    fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SessionError::Persistence("write rejected".into()));
        }
        self.rows.lock().insert(session.id.clone(), session.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn touch(&self, id: &str, expires_at: DateTime<Utc>) -> Result<(), SessionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SessionError::Persistence("write rejected".into()));
        }
        if let Some(row) = self.rows.lock().get_mut(id) {
            row.expires_at = expires_at;
        }
        self.touches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.rows.lock().remove(id);
        Ok(())
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let mut rows = self.rows.lock();
        let before = rows.len();
        rows.retain(|_, s| !s.is_expired(now));
        Ok(before - rows.len())
    }
}
