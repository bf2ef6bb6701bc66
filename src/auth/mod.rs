//! Operator authentication.
//!
//! # Data Flow
//! ```text
//! POST /login → AuthManager::authenticate
//!     → lock check → PrincipalDirectory::lookup → privilege check
//!     → CredentialVerifier::verify_password (no lock held)
//!     → AuthenticatedSession (id stored in the generic session)
//!
//! Protected request → auth gate → AuthManager::validate_session
//! ```

pub mod manager;
pub mod principal;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use manager::{AuthManager, AuthPolicy, AuthenticatedSession, CleanupStats};
pub use principal::{CredentialVerifier, Principal, PrincipalDirectory, SuVerifier, SystemDirectory};

/// The single message clients see for any failed login.
pub const LOGIN_FAILED_MESSAGE: &str = "Invalid username or password";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("client locked out until {until}")]
    LockedOut { until: DateTime<Utc> },

    #[error("too many login attempts in progress")]
    TooManyAttempts,

    #[error("unknown principal '{0}'")]
    UnknownPrincipal(String),

    #[error("principal '{0}' is not in an administrative group")]
    InsufficientPrivilege(String),

    #[error("invalid credential")]
    InvalidCredential,

    #[error("authenticated session not found")]
    SessionNotFound,

    #[error("authenticated session expired")]
    SessionExpired,
}

impl AuthError {
    /// What a client is told. Login failures are indistinguishable.
    pub fn public_message(&self) -> &'static str {
        match self {
            AuthError::SessionNotFound | AuthError::SessionExpired => "Unauthorized",
            _ => LOGIN_FAILED_MESSAGE,
        }
    }

    /// Metric label for a failed login.
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthError::LockedOut { .. } => "locked_out",
            AuthError::TooManyAttempts => "too_many_attempts",
            AuthError::UnknownPrincipal(_) => "unknown_principal",
            AuthError::InsufficientPrivilege(_) => "insufficient_privilege",
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::SessionExpired => "session_expired",
        }
    }
}
