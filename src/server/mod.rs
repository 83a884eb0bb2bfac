//! Accept loop that hands each connection to a session.
//!
//! # Responsibilities
//! - Accept TCP connections under the listener's connection limit
//! - Run one session per connection
//! - On shutdown, stop accepting and wait for sessions to drain

pub mod mux;

pub use mux::MuxServer;
