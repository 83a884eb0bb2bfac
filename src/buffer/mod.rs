//! Connection buffering subsystem.
//!
//! # Data Flow
//! ```text
//! accepted connection
//!     → pool.rs (acquire read + write buffers)
//!     → endpoint.rs (FrameReader / FrameWriter over each half)
//!     → session tasks
//!     → drop returns buffers to the pool
//! ```

pub mod endpoint;
pub mod pool;

pub use endpoint::{FrameReader, FrameWriter};
pub use pool::{BufferPool, PoolError, PooledBuffer};
