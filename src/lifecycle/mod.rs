//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → HTTP server stops accepting and drains
//!               → session, auth and rate limit janitors exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
