//! Frame model and wire codec.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → codec.rs (FrameCodec::decode, 8-byte header + payload)
//!     → Frame (control or data)
//!     → session reader dispatch
//!
//! session writer
//!     → codec.rs (FrameCodec::encode)
//!     → socket bytes
//! ```
//!
//! # Design Decisions
//! - SPDY/3 framing; header blocks stay opaque (no compression context)
//! - Unmodeled control types survive as `Frame::Unknown`
//! - Frames are moved by value between tasks

pub mod codec;

use bytes::Bytes;

pub use codec::{FrameCodec, FrameError};

/// Protocol version carried in every control frame header.
pub const SPDY_VERSION: u16 = 3;

/// Size of both control and data frame headers.
pub const HEADER_LEN: usize = 8;

/// Largest payload length representable in the 24-bit length field.
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

/// Stream identifiers are 31 bits wide.
pub const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// Last frame the sender will emit on this stream.
pub const FLAG_FIN: u8 = 0x01;

/// SYN_STREAM only: the recipient must not send on this stream.
pub const FLAG_UNIDIRECTIONAL: u8 = 0x02;

/// Control frame type codes.
pub mod kind {
    pub const SYN_STREAM: u16 = 1;
    pub const SYN_REPLY: u16 = 2;
    pub const RST_STREAM: u16 = 3;
    pub const SETTINGS: u16 = 4;
    pub const PING: u16 = 6;
    pub const GOAWAY: u16 = 7;
    pub const HEADERS: u16 = 8;
    pub const WINDOW_UPDATE: u16 = 9;
}

/// RST_STREAM status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RstStatus {
    ProtocolError,
    InvalidStream,
    RefusedStream,
    UnsupportedVersion,
    Cancel,
    InternalError,
    FlowControlError,
    StreamInUse,
    StreamAlreadyClosed,
    InvalidCredentials,
    FrameTooLarge,
    Other(u32),
}

impl From<u32> for RstStatus {
    fn from(code: u32) -> Self {
        match code {
            1 => RstStatus::ProtocolError,
            2 => RstStatus::InvalidStream,
            3 => RstStatus::RefusedStream,
            4 => RstStatus::UnsupportedVersion,
            5 => RstStatus::Cancel,
            6 => RstStatus::InternalError,
            7 => RstStatus::FlowControlError,
            8 => RstStatus::StreamInUse,
            9 => RstStatus::StreamAlreadyClosed,
            10 => RstStatus::InvalidCredentials,
            11 => RstStatus::FrameTooLarge,
            other => RstStatus::Other(other),
        }
    }
}

impl From<RstStatus> for u32 {
    fn from(status: RstStatus) -> Self {
        match status {
            RstStatus::ProtocolError => 1,
            RstStatus::InvalidStream => 2,
            RstStatus::RefusedStream => 3,
            RstStatus::UnsupportedVersion => 4,
            RstStatus::Cancel => 5,
            RstStatus::InternalError => 6,
            RstStatus::FlowControlError => 7,
            RstStatus::StreamInUse => 8,
            RstStatus::StreamAlreadyClosed => 9,
            RstStatus::InvalidCredentials => 10,
            RstStatus::FrameTooLarge => 11,
            RstStatus::Other(code) => code,
        }
    }
}

/// GOAWAY status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoAwayStatus {
    Ok,
    ProtocolError,
    InternalError,
    Other(u32),
}

impl From<u32> for GoAwayStatus {
    fn from(code: u32) -> Self {
        match code {
            0 => GoAwayStatus::Ok,
            1 => GoAwayStatus::ProtocolError,
            2 => GoAwayStatus::InternalError,
            other => GoAwayStatus::Other(other),
        }
    }
}

impl From<GoAwayStatus> for u32 {
    fn from(status: GoAwayStatus) -> Self {
        match status {
            GoAwayStatus::Ok => 0,
            GoAwayStatus::ProtocolError => 1,
            GoAwayStatus::InternalError => 2,
            GoAwayStatus::Other(code) => code,
        }
    }
}

/// One entry of a SETTINGS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsEntry {
    pub flags: u8,
    /// 24-bit setting identifier.
    pub id: u32,
    pub value: u32,
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opens a new stream.
    SynStream {
        stream_id: u32,
        associated_stream_id: u32,
        /// 3-bit priority, 0 is highest. Carried, never scheduled on.
        priority: u8,
        slot: u8,
        flags: u8,
        header_block: Bytes,
    },
    SynReply {
        stream_id: u32,
        flags: u8,
        header_block: Bytes,
    },
    RstStream {
        stream_id: u32,
        status: RstStatus,
    },
    Settings {
        flags: u8,
        entries: Vec<SettingsEntry>,
    },
    Ping {
        id: u32,
    },
    GoAway {
        last_good_stream_id: u32,
        status: GoAwayStatus,
    },
    Headers {
        stream_id: u32,
        flags: u8,
        header_block: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        delta: u32,
    },
    Data {
        stream_id: u32,
        flags: u8,
        data: Bytes,
    },
    /// A control frame of a type this codec does not model.
    Unknown {
        kind: u16,
        flags: u8,
        payload: Bytes,
    },
}

impl Frame {
    /// Short name used for log fields and metric labels.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::SynStream { .. } => "syn_stream",
            Frame::SynReply { .. } => "syn_reply",
            Frame::RstStream { .. } => "rst_stream",
            Frame::Settings { .. } => "settings",
            Frame::Ping { .. } => "ping",
            Frame::GoAway { .. } => "goaway",
            Frame::Headers { .. } => "headers",
            Frame::WindowUpdate { .. } => "window_update",
            Frame::Data { .. } => "data",
            Frame::Unknown { .. } => "unknown",
        }
    }

    /// The stream this frame belongs to, for stream-scoped frames.
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            Frame::SynStream { stream_id, .. }
            | Frame::SynReply { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Data { stream_id, .. } => Some(*stream_id),
            Frame::Settings { .. }
            | Frame::Ping { .. }
            | Frame::GoAway { .. }
            | Frame::Unknown { .. } => None,
        }
    }

    /// Whether the sender marked this as its last frame on the stream.
    pub fn is_fin(&self) -> bool {
        match self {
            Frame::SynStream { flags, .. }
            | Frame::SynReply { flags, .. }
            | Frame::Headers { flags, .. }
            | Frame::Data { flags, .. } => flags & FLAG_FIN != 0,
            _ => false,
        }
    }

    /// Whether no further inbound frames are expected on the stream after this one.
    pub fn ends_stream(&self) -> bool {
        self.is_fin() || matches!(self, Frame::RstStream { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_scoped_frames_expose_their_id() {
        let data = Frame::Data {
            stream_id: 5,
            flags: 0,
            data: Bytes::new(),
        };
        assert_eq!(data.stream_id(), Some(5));
        assert_eq!(Frame::Ping { id: 1 }.stream_id(), None);
        assert_eq!(
            Frame::GoAway {
                last_good_stream_id: 7,
                status: GoAwayStatus::Ok
            }
            .stream_id(),
            None
        );
    }

    #[test]
    fn fin_and_reset_end_the_stream() {
        let fin = Frame::Data {
            stream_id: 1,
            flags: FLAG_FIN,
            data: Bytes::from_static(b"x"),
        };
        assert!(fin.is_fin());
        assert!(fin.ends_stream());

        let rst = Frame::RstStream {
            stream_id: 1,
            status: RstStatus::Cancel,
        };
        assert!(!rst.is_fin());
        assert!(rst.ends_stream());

        let open = Frame::Headers {
            stream_id: 1,
            flags: 0,
            header_block: Bytes::new(),
        };
        assert!(!open.ends_stream());
    }

    #[test]
    fn status_codes_map_both_ways() {
        assert_eq!(RstStatus::from(3), RstStatus::RefusedStream);
        assert_eq!(u32::from(RstStatus::RefusedStream), 3);
        assert_eq!(RstStatus::from(42), RstStatus::Other(42));
        assert_eq!(GoAwayStatus::from(0), GoAwayStatus::Ok);
        assert_eq!(u32::from(GoAwayStatus::InternalError), 2);
    }
}
