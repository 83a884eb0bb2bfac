//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops → every session writer sends GOAWAY
//!             → sessions drain within their grace period → server exits
//! ```
//!
//! # Design Decisions
//! - One broadcast reaches the accept loop and every live session
//! - Shutdown has timeout: the server stops waiting after the drain deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
