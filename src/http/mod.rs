//! HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum serve, ConnectInfo, graceful shutdown)
//!     → routing::Dispatcher (recovery + global middleware + trie)
//!     → middleware/ (logging, CORS, rate limit, auth gate)
//!     → panel handlers
//!     → response.rs (JSON envelope, redirects)
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{client_identity, RequestId, RequestIdExt, TrustProxyHeaders, X_REQUEST_ID};
pub use response::{json_error, redirect, ApiResponse};
pub use server::{build_dispatcher, AppState, PanelServer, StartupError};
