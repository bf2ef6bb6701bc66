//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and formats.
//! Every failing rule is reported, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::clock::MAX_WINDOW_SECS;
use crate::config::schema::PanelConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{field} must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },

    #[error("{field}: '{value}' must start with '/'")]
    RelativePath { field: &'static str, value: String },

    #[error("auth.admin_groups must name at least one group")]
    NoAdminGroups,

    #[error("session.cookie_name must not be empty")]
    EmptyCookieName,

    #[error("observability.log_format: unknown format '{0}' (expected 'pretty' or 'json')")]
    UnknownLogFormat(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &PanelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.session.cookie_name.trim().is_empty() {
        errors.push(ValidationError::EmptyCookieName);
    }

    let windows = [
        ("session.ttl_secs", config.session.ttl_secs),
        ("session.sweep_interval_secs", config.session.sweep_interval_secs),
        ("auth.session_timeout_secs", config.auth.session_timeout_secs),
        ("auth.lockout_secs", config.auth.lockout_secs),
        ("auth.verify_timeout_secs", config.auth.verify_timeout_secs),
        ("auth.sweep_interval_secs", config.auth.sweep_interval_secs),
        ("rate_limit.prune_interval_secs", config.rate_limit.prune_interval_secs),
    ];
    for (field, value) in windows {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        } else if value > MAX_WINDOW_SECS {
            errors.push(ValidationError::TooLarge {
                field,
                max: MAX_WINDOW_SECS,
            });
        }
    }

    for (field, value) in [
        ("auth.max_login_attempts", config.auth.max_login_attempts),
        ("rate_limit.requests_per_minute", config.rate_limit.requests_per_minute),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.auth.admin_groups.iter().all(|g| g.trim().is_empty()) {
        errors.push(ValidationError::NoAdminGroups);
    }

    for (field, value) in [
        ("auth.login_path", &config.auth.login_path),
        ("static_files.prefix", &config.static_files.prefix),
    ] {
        if !value.starts_with('/') {
            errors.push(ValidationError::RelativePath {
                field,
                value: value.clone(),
            });
        }
    }

    match config.observability.log_format.as_str() {
        "pretty" | "json" => {}
        other => errors.push(ValidationError::UnknownLogFormat(other.to_string())),
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
