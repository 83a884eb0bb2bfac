//! Multiplexed stream sessions.
//!
//! # Data Flow
//! ```text
//! connection read half
//!     → reader.rs (decode, dispatch, register streams)
//!     → registry.rs (stream id → delivery queue)
//!     → stream.rs (one task per stream)
//!     → handler.rs (application StreamHandler)
//!
//! handlers, PING echo, RST, GOAWAY
//!     → writer.rs (Outbound queue, single writer)
//!     → connection write half
//! ```
//!
//! # Design Decisions
//! - One reader task, one writer task and one task per stream
//! - Only the reader inserts into the registry; only stream tasks remove
//! - All teardown goes through `Session::shutdown`, which fires once
//! - The server's stop signal reaches sessions through their writer

pub mod control;
pub mod handler;
pub mod manager;
mod reader;
pub mod registry;
mod stream;
pub mod writer;

#[cfg(test)]
mod tests;

pub use control::{CloseReason, Session, SessionState};
pub use handler::{DiscardHandler, StreamContext, StreamHandler};
pub use manager::SessionManager;
pub use registry::{RegistryError, StreamRegistry};
pub use writer::Outbound;
