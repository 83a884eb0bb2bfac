//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the multiplexing server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Per-connection session behaviour.
    pub session: SessionConfig,

    /// Connection buffer pool.
    pub buffers: BufferConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Session configuration, applied to every accepted connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Streams a peer may hold open at once; further opens are refused.
    pub max_concurrent_streams: usize,

    /// Depth of each stream's delivery queue.
    pub stream_queue_depth: usize,

    /// Depth of the outbound queue feeding the writer.
    pub outbound_queue_depth: usize,

    /// Largest accepted frame payload in bytes.
    pub max_frame_len: usize,

    /// Read-side grace period after the server stops accepting, in milliseconds.
    pub shutdown_grace_ms: u64,

    /// Close a stream that receives nothing for this long, in milliseconds. 0 disables.
    pub stream_idle_timeout_ms: u64,

    /// How long the server waits for sessions to finish after shutdown, in seconds.
    pub drain_timeout_secs: u64,
}

impl SessionConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        (self.stream_idle_timeout_ms > 0).then(|| Duration::from_millis(self.stream_idle_timeout_ms))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            stream_queue_depth: 16,
            outbound_queue_depth: 64,
            max_frame_len: 0x00FF_FFFF,
            shutdown_grace_ms: 3_000,
            stream_idle_timeout_ms: 60_000,
            drain_timeout_secs: 10,
        }
    }
}

/// Buffer pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Nominal size of each connection buffer in bytes.
    pub buffer_size: usize,

    /// Idle buffers kept for reuse.
    pub max_pooled: usize,

    /// Buffers that may be checked out at once. 0 means unbounded.
    pub max_outstanding: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            max_pooled: 1024,
            max_outstanding: 0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
