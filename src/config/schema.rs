//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the panel.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the control panel.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PanelConfig {
    /// Enables verbose logging.
    pub debug: bool,

    /// Listener configuration (bind address, proxy trust).
    pub listener: ListenerConfig,

    /// Cookie-backed session store settings.
    pub session: SessionConfig,

    /// Login, lockout and authenticated-session settings.
    pub auth: AuthConfig,

    /// Per-client request rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Cross-origin response headers.
    pub cors: CorsConfig,

    /// Static asset serving.
    pub static_files: StaticFilesConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites these headers.
    pub trust_proxy_headers: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            trust_proxy_headers: false,
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,

    /// Sliding lifetime of a session in seconds.
    pub ttl_secs: u64,

    /// Interval between expired-session sweeps.
    pub sweep_interval_secs: u64,

    /// SQLite database holding persisted sessions.
    pub database_path: String,

    /// Mark the cookie `Secure` (requires TLS termination in front).
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session_id".to_string(),
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
            database_path: "/var/lib/server-panel/panel.db".to_string(),
            secure_cookie: false,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Inactivity timeout for authenticated sessions in seconds.
    pub session_timeout_secs: u64,

    /// Failed logins from one client before it is locked out.
    pub max_login_attempts: u32,

    /// Lockout window in seconds.
    pub lockout_secs: u64,

    /// Lowest uid allowed to log in (system accounts sit below it).
    pub min_uid: u32,

    /// Uid that bypasses the `min_uid` and admin-group checks.
    pub superuser_uid: u32,

    /// Membership in any of these groups grants panel access.
    pub admin_groups: Vec<String>,

    /// Upper bound on one external password check.
    pub verify_timeout_secs: u64,

    /// Interval between expired-session / stale-attempt sweeps.
    pub sweep_interval_secs: u64,

    /// Account database.
    pub passwd_path: String,

    /// Group database.
    pub group_path: String,

    /// Page unauthenticated browsers are redirected to.
    pub login_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 24 * 60 * 60,
            max_login_attempts: 5,
            lockout_secs: 15 * 60,
            min_uid: 1000,
            superuser_uid: 0,
            admin_groups: vec!["sudo".to_string(), "wheel".to_string(), "admin".to_string()],
            verify_timeout_secs: 10,
            sweep_interval_secs: 5 * 60,
            passwd_path: "/etc/passwd".to_string(),
            group_path: "/etc/group".to_string(),
            login_path: "/login".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Requests allowed per client within any sliding minute.
    pub requests_per_minute: u32,

    /// Interval between pruning idle clients from the limiter.
    pub prune_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 60,
            prune_interval_secs: 60,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allow_origin: String,
    pub allow_methods: String,
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization".to_string(),
        }
    }
}

/// Static asset configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// URL prefix the assets are mounted under.
    pub prefix: String,

    /// Directory on disk.
    pub directory: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            prefix: "/static".to_string(),
            directory: "./assets".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Requests slower than this are logged at warn level.
    pub slow_request_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
            slow_request_ms: 50,
        }
    }
}
