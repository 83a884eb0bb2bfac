//! Multiplexed stream session server library.

pub mod buffer;
pub mod config;
pub mod frame;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;
pub mod session;

pub use config::schema::ServerConfig;
pub use frame::{Frame, FrameCodec};
pub use lifecycle::Shutdown;
pub use server::MuxServer;
pub use session::{CloseReason, SessionManager, StreamContext, StreamHandler};
