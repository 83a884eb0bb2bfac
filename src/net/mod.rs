//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ID assignment, live-connection tracking)
//!     → Hand off to the session layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Sessions report back through `ConnectionObserver`, never through errors

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionObserver, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
