//! Middleware for the dispatch pipeline.
//!
//! # Order
//! ```text
//! recovery (installed by the dispatcher, always outermost)
//!     → logger → cors → rate_limit        (global)
//!     → auth_gate                         (protected group only)
//!     → handler
//! ```

pub mod auth;
pub mod cors;
pub mod logger;
pub mod recovery;

pub use auth::{auth_gate, current_session, current_user, AUTH_SESSION_KEY};
pub use cors::cors;
pub use logger::logger;
pub use recovery::recovery;
