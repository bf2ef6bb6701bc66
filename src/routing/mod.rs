//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Router::get/post/.., Group, static_files
//!     → tree.rs (one trie per method, conflicts rejected)
//!     → Router::into_dispatcher (frozen, shared)
//!
//! Request:
//!     Dispatcher → recovery → global middleware
//!     → trie lookup (static > param > wildcard)
//!     → PathParams into extensions → handler (group middleware baked in)
//!     → or the NotFound handler
//! ```
//!
//! # Design Decisions
//! - One handler signature; middleware is `Handler -> Handler`
//! - Tries are immutable after startup, no locking on the hot path

pub mod handler;
pub mod router;
pub mod tree;

pub use handler::{
    compose, handler, middleware, path_params, with_state, BoxResponseFuture, Handler, Middleware,
    PathParams,
};
pub use router::{join_paths, Dispatcher, Group, RouteMatch, Router};
pub use tree::RegistrationError;
