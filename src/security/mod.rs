//! Request-level protection applied ahead of routing.
//!
//! Only rate limiting lives here for now; authentication gating sits with
//! the rest of the HTTP middleware since it needs the session store.

pub mod rate_limit;

pub use rate_limit::{rate_limit, RateLimiter};
