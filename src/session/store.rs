//! Cookie-keyed session store.
//!
//! # Responsibilities
//! - Resolve the `session_id` cookie to a session, creating one when the
//!   cookie is missing or points at an unknown or expired record
//! - Slide the expiry forward on every successful lookup
//! - Write the cookie and persist dirty sessions on `save`
//! - Keep the stored expiry within a minute of the sliding one
//! - Issue a fresh token on privilege change (`regenerate`)
//! - Sweep expired sessions from memory and storage on a timer
//!
//! The in-memory map is the source of truth while the process runs. The
//! backend is written through on dirty saves and read once at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use super::backend::{SessionBackend, StoredSession};
use super::SessionError;
use crate::clock::{self, Clock};
use crate::config::SessionConfig;

const TOKEN_BYTES: usize = 16;
const MAX_TOKEN_LEN: usize = 128;
/// Slack allowed between the in-memory and the stored expiry before a
/// clean session has its expiry written through.
const EXPIRY_WRITE_SECS: i64 = 60;

/// A request's view of its session.
///
/// Handlers mutate this snapshot and hand it back through
/// [`SessionStore::save`]. When two requests save the same session, the
/// last one wins.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: HashMap<String, Value>,
    expires_at: DateTime<Utc>,
    dirty: bool,
    fresh: bool,
}

impl Session {
    fn fresh(id: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            data: HashMap::new(),
            expires_at,
            dirty: true,
            fresh: true,
        }
    }

    fn from_stored(stored: StoredSession) -> Self {
        Self {
            id: stored.id,
            data: stored.data,
            expires_at: stored.expires_at,
            dirty: false,
            fresh: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Never saved yet.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Has changes the backend has not seen.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
        self.dirty = true;
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    fn to_stored(&self) -> StoredSession {
        StoredSession {
            id: self.id.clone(),
            data: self.data.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// A session held in memory, with the expiry the backend last saw.
#[derive(Debug, Clone)]
struct Entry {
    record: StoredSession,
    persisted_until: Option<DateTime<Utc>>,
}

impl Entry {
    /// Stored expiry is at least [`EXPIRY_WRITE_SECS`] behind memory.
    fn lags(&self) -> bool {
        self.persisted_until.is_some_and(|persisted| {
            self.record.expires_at - persisted >= chrono::Duration::seconds(EXPIRY_WRITE_SECS)
        })
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    backend: Arc<dyn SessionBackend>,
    clock: Arc<dyn Clock>,
    cookie_name: String,
    ttl: chrono::Duration,
    secure_cookie: bool,
}

impl SessionStore {
    /// Build the store and hydrate it from `backend`.
    ///
    /// A backend that cannot be read leaves the store empty; it never
    /// prevents startup.
    pub fn new(backend: Arc<dyn SessionBackend>, clock: Arc<dyn Clock>, config: &SessionConfig) -> Self {
        let store = Self {
            sessions: RwLock::new(HashMap::new()),
            backend,
            clock,
            cookie_name: config.cookie_name.clone(),
            ttl: clock::window(config.ttl_secs),
            secure_cookie: config.secure_cookie,
        };
        store.hydrate();
        store
    }

    fn hydrate(&self) {
        let now = self.clock.now();
        match self.backend.load_active(now) {
            Ok(rows) => {
                let count = rows.len();
                let mut sessions = self.sessions.write();
                for row in rows {
                    let persisted_until = Some(row.expires_at);
                    sessions.insert(
                        row.id.clone(),
                        Entry {
                            record: row,
                            persisted_until,
                        },
                    );
                }
                tracing::info!(sessions = count, "Session store hydrated");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load persisted sessions, starting empty");
            }
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Sessions currently held in memory, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Look up a live session by id.
    pub fn load(&self, id: &str) -> Result<Session, SessionError> {
        let now = self.clock.now();
        let sessions = self.sessions.read();
        let entry = sessions.get(id).ok_or(SessionError::NotFound)?;
        if entry.record.is_expired(now) {
            return Err(SessionError::Expired);
        }
        Ok(Session::from_stored(entry.record.clone()))
    }

    /// The session for a request.
    ///
    /// An unknown or expired cookie token is reused for the replacement
    /// session so the browser keeps the same cookie. Call [`regenerate`]
    /// before binding credentials to it.
    ///
    /// [`regenerate`]: SessionStore::regenerate
    pub fn get(&self, headers: &HeaderMap) -> Session {
        let token = cookie_value(headers, &self.cookie_name).filter(|t| is_valid_token(t));

        let Some(token) = token else {
            return Session::fresh(generate_token(), self.clock.now() + self.ttl);
        };

        match self.load(&token) {
            Ok(mut session) => {
                let expires_at = self.clock.now() + self.ttl;
                if let Some(entry) = self.sessions.write().get_mut(&token) {
                    entry.record.expires_at = entry.record.expires_at.max(expires_at);
                }
                session.expires_at = expires_at;
                session
            }
            Err(reason) => {
                tracing::debug!(reason = %reason, "Replacing session for presented token");
                Session::fresh(token, self.clock.now() + self.ttl)
            }
        }
    }

    /// Write the cookie and commit the session.
    ///
    /// The in-memory copy is always updated. The backend gets the full
    /// record when the session is dirty, and just the expiry when the
    /// stored one has fallen behind. A backend failure is returned after
    /// the cookie and memory are already set, and the session stays dirty.
    pub fn save(&self, session: &mut Session, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let lags = {
            let mut sessions = self.sessions.write();
            let persisted_until = sessions.get(&session.id).and_then(|e| e.persisted_until);
            let entry = Entry {
                record: session.to_stored(),
                persisted_until,
            };
            let lags = entry.lags();
            if persisted_until.is_none() {
                session.dirty = true;
            }
            sessions.insert(session.id.clone(), entry);
            lags
        };

        if let Some(cookie) = self.session_cookie(&session.id, session.expires_at) {
            headers.append(header::SET_COOKIE, cookie);
        }

        if session.dirty {
            self.backend.save(&session.to_stored()).inspect_err(|e| {
                tracing::error!(session_id = %session.id, error = %e, "Failed to persist session");
            })?;
            session.dirty = false;
            session.fresh = false;
            self.mark_persisted(&session.id, session.expires_at);
        } else if lags {
            self.persist_expiry(&session.id, session.expires_at)?;
        }
        Ok(())
    }

    /// Re-send the cookie for a session already committed by [`save`],
    /// carrying its slid expiry, and write that expiry through when the
    /// stored one lags behind.
    ///
    /// Does nothing when the session has since been destroyed.
    ///
    /// [`save`]: SessionStore::save
    pub fn refresh(&self, session: &Session, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let Some((expires_at, lags)) = self
            .sessions
            .read()
            .get(&session.id)
            .map(|e| (e.record.expires_at, e.lags()))
        else {
            return Ok(());
        };

        if let Some(cookie) = self.session_cookie(&session.id, expires_at) {
            headers.append(header::SET_COOKIE, cookie);
        }
        if lags {
            self.persist_expiry(&session.id, expires_at)?;
        }
        Ok(())
    }

    /// Move `session` to a new token, carrying its data over.
    ///
    /// The old record is removed from memory and storage. The session comes
    /// back dirty; the caller saves it to issue the new cookie.
    pub fn regenerate(&self, session: &mut Session) -> Result<(), SessionError> {
        let old = std::mem::replace(&mut session.id, generate_token());
        session.dirty = true;
        session.fresh = true;
        self.destroy(&old)
    }

    fn persist_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<(), SessionError> {
        self.backend.touch(id, expires_at).inspect_err(|e| {
            tracing::warn!(session_id = %id, error = %e, "Failed to persist session expiry");
        })?;
        self.mark_persisted(id, expires_at);
        Ok(())
    }

    fn mark_persisted(&self, id: &str, expires_at: DateTime<Utc>) {
        if let Some(entry) = self.sessions.write().get_mut(id) {
            entry.persisted_until = Some(entry.persisted_until.map_or(expires_at, |p| p.max(expires_at)));
        }
    }

    /// Remove a session everywhere. Unknown ids are ignored.
    pub fn destroy(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.write().remove(id);
        self.backend.delete(id)
    }

    /// Append a `Set-Cookie` that makes the browser drop the session cookie.
    pub fn clear_cookie(&self, headers: &mut HeaderMap) {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.cookie_name
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.append(header::SET_COOKIE, value);
        }
    }

    fn session_cookie(&self, id: &str, expires_at: DateTime<Utc>) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Expires={}",
            self.cookie_name,
            id,
            expires_at.format("%a, %d %b %Y %H:%M:%S GMT")
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }

    /// Drop expired sessions from memory and storage.
    ///
    /// Live sessions whose stored expiry lags are written through first,
    /// so the bulk delete never takes a row that memory still serves.
    /// Returns how many were removed from memory. Storage failures are
    /// logged and retried on the next sweep.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let (removed, lagging) = {
            let mut sessions = self.sessions.write();
            let before = sessions.len();
            sessions.retain(|_, e| !e.record.is_expired(now));
            let lagging: Vec<_> = sessions
                .values()
                .filter(|e| e.persisted_until.is_some_and(|p| p < e.record.expires_at))
                .map(|e| (e.record.id.clone(), e.record.expires_at))
                .collect();
            (before - sessions.len(), lagging)
        };

        for (id, expires_at) in lagging {
            // Logged inside; the row is retried on the next sweep.
            let _ = self.persist_expiry(&id, expires_at);
        }

        match self.backend.delete_expired(now) {
            Ok(rows) => tracing::debug!(memory = removed, rows, "Swept expired sessions"),
            Err(e) => tracing::warn!(error = %e, "Failed to delete expired session rows"),
        }
        removed
    }

    pub async fn run_janitor(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; nothing has expired yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session janitor shutting down");
                    break;
                }
            }
        }
    }
}

/// 128-bit random token, hex encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.len() <= MAX_TOKEN_LEN && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Value of cookie `name` across all `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
}
