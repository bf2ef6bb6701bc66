//! Web control panel for a single Linux host.
//!
//! The core is the request path: a trie router with composable middleware,
//! a persisted cookie session store and an authentication manager with
//! per-client lockout that gates every protected route.

pub mod auth;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod panel;
pub mod routing;
pub mod security;
pub mod session;

pub use config::PanelConfig;
pub use http::{AppState, PanelServer};
pub use lifecycle::Shutdown;
