//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::frame::{HEADER_LEN, MAX_PAYLOAD_LEN};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("session.max_frame_len must be between {min} and {max}, got {value}")]
    FrameLenOutOfRange { value: usize, min: usize, max: usize },
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let positive = [
        ("listener.max_connections", config.listener.max_connections),
        ("session.max_concurrent_streams", config.session.max_concurrent_streams),
        ("session.stream_queue_depth", config.session.stream_queue_depth),
        ("session.outbound_queue_depth", config.session.outbound_queue_depth),
        ("buffers.buffer_size", config.buffers.buffer_size),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }
    if config.session.shutdown_grace_ms == 0 {
        errors.push(ValidationError::Zero("session.shutdown_grace_ms"));
    }

    let frame_len = config.session.max_frame_len;
    if !(HEADER_LEN..=MAX_PAYLOAD_LEN).contains(&frame_len) {
        errors.push(ValidationError::FrameLenOutOfRange {
            value: frame_len,
            min: HEADER_LEN,
            max: MAX_PAYLOAD_LEN,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
