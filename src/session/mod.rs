//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! Request cookie → SessionStore::get → Session (owned snapshot)
//!     → handler reads/mutates
//!     → SessionStore::save → Set-Cookie + memory + backend (if dirty)
//!
//! Janitor (fixed interval):
//!     SessionStore::sweep → memory retain + backend bulk delete
//! ```

pub mod backend;
pub mod store;

use thiserror::Error;

pub use backend::{MemoryBackend, SessionBackend, SqliteBackend, StoredSession};
pub use store::{cookie_value, Session, SessionStore};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session persistence failed: {0}")]
    Persistence(String),
}
