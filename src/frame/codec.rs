//! Frame encoding and decoding.
//!
//! ```text
//! control:  |1| version(15) | type(16) | flags(8) | length(24) | payload
//! data:     |0| stream-id(31)          | flags(8) | length(24) | payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::{
    kind, Frame, SettingsEntry, HEADER_LEN, MAX_PAYLOAD_LEN, SPDY_VERSION, STREAM_ID_MASK,
};

const CONTROL_BIT: u32 = 0x8000_0000;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Control frame carries a version other than 3.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Payload length does not fit the frame type.
    #[error("invalid length {len} for {kind} frame")]
    InvalidLength { kind: &'static str, len: usize },

    /// Declared payload exceeds the configured limit.
    #[error("frame payload of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Connection ended in the middle of a frame.
    #[error("connection closed with {buffered} bytes of a partial frame")]
    Truncated { buffered: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stateless SPDY/3 frame codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    /// Create a codec accepting payloads up to `max_payload_len` bytes.
    ///
    /// The limit is clamped to what the 24-bit length field can express.
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            max_payload_len: max_payload_len.min(MAX_PAYLOAD_LEN),
        }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let len = u32::from_be_bytes([0, src[5], src[6], src[7]]) as usize;
        if len > self.max_payload_len {
            return Err(FrameError::FrameTooLarge {
                len,
                max: self.max_payload_len,
            });
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let mut header = src.split_to(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        let word = header.get_u32();
        let flags = header.get_u8();

        if word & CONTROL_BIT == 0 {
            return Ok(Some(Frame::Data {
                stream_id: word & STREAM_ID_MASK,
                flags,
                data: payload,
            }));
        }

        let version = ((word >> 16) & 0x7FFF) as u16;
        if version != SPDY_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        decode_control((word & 0xFFFF) as u16, flags, payload).map(Some)
    }
}

fn decode_control(frame_kind: u16, flags: u8, mut payload: Bytes) -> Result<Frame, FrameError> {
    let len = payload.len();
    let invalid = |kind: &'static str| FrameError::InvalidLength { kind, len };

    let frame = match frame_kind {
        kind::SYN_STREAM => {
            if len < 10 {
                return Err(invalid("syn_stream"));
            }
            let stream_id = payload.get_u32() & STREAM_ID_MASK;
            let associated_stream_id = payload.get_u32() & STREAM_ID_MASK;
            let priority = payload.get_u8() >> 5;
            let slot = payload.get_u8();
            Frame::SynStream {
                stream_id,
                associated_stream_id,
                priority,
                slot,
                flags,
                header_block: payload,
            }
        }
        kind::SYN_REPLY => {
            if len < 4 {
                return Err(invalid("syn_reply"));
            }
            let stream_id = payload.get_u32() & STREAM_ID_MASK;
            Frame::SynReply {
                stream_id,
                flags,
                header_block: payload,
            }
        }
        kind::RST_STREAM => {
            if len != 8 {
                return Err(invalid("rst_stream"));
            }
            Frame::RstStream {
                stream_id: payload.get_u32() & STREAM_ID_MASK,
                status: payload.get_u32().into(),
            }
        }
        kind::SETTINGS => {
            if len < 4 {
                return Err(invalid("settings"));
            }
            let count = payload.get_u32() as usize;
            if count.checked_mul(8) != Some(payload.remaining()) {
                return Err(invalid("settings"));
            }
            let entries = (0..count)
                .map(|_| {
                    let word = payload.get_u32();
                    SettingsEntry {
                        flags: (word >> 24) as u8,
                        id: word & 0x00FF_FFFF,
                        value: payload.get_u32(),
                    }
                })
                .collect();
            Frame::Settings { flags, entries }
        }
        kind::PING => {
            if len != 4 {
                return Err(invalid("ping"));
            }
            Frame::Ping {
                id: payload.get_u32(),
            }
        }
        kind::GOAWAY => {
            if len != 8 {
                return Err(invalid("goaway"));
            }
            Frame::GoAway {
                last_good_stream_id: payload.get_u32() & STREAM_ID_MASK,
                status: payload.get_u32().into(),
            }
        }
        kind::HEADERS => {
            if len < 4 {
                return Err(invalid("headers"));
            }
            let stream_id = payload.get_u32() & STREAM_ID_MASK;
            Frame::Headers {
                stream_id,
                flags,
                header_block: payload,
            }
        }
        kind::WINDOW_UPDATE => {
            if len != 8 {
                return Err(invalid("window_update"));
            }
            Frame::WindowUpdate {
                stream_id: payload.get_u32() & STREAM_ID_MASK,
                delta: payload.get_u32() & 0x7FFF_FFFF,
            }
        }
        other => Frame::Unknown {
            kind: other,
            flags,
            payload,
        },
    };
    Ok(frame)
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        match frame {
            Frame::SynStream {
                stream_id,
                associated_stream_id,
                priority,
                slot,
                flags,
                header_block,
            } => {
                let len = 10 + header_block.len();
                put_control_header(dst, kind::SYN_STREAM, flags, len)?;
                dst.put_u32(stream_id & STREAM_ID_MASK);
                dst.put_u32(associated_stream_id & STREAM_ID_MASK);
                dst.put_u8((priority & 0x07) << 5);
                dst.put_u8(slot);
                dst.put_slice(&header_block);
            }
            Frame::SynReply {
                stream_id,
                flags,
                header_block,
            } => {
                put_control_header(dst, kind::SYN_REPLY, flags, 4 + header_block.len())?;
                dst.put_u32(stream_id & STREAM_ID_MASK);
                dst.put_slice(&header_block);
            }
            Frame::RstStream { stream_id, status } => {
                put_control_header(dst, kind::RST_STREAM, 0, 8)?;
                dst.put_u32(stream_id & STREAM_ID_MASK);
                dst.put_u32(status.into());
            }
            Frame::Settings { flags, entries } => {
                put_control_header(dst, kind::SETTINGS, flags, 4 + 8 * entries.len())?;
                dst.put_u32(entries.len() as u32);
                for entry in entries {
                    dst.put_u32(((entry.flags as u32) << 24) | (entry.id & 0x00FF_FFFF));
                    dst.put_u32(entry.value);
                }
            }
            Frame::Ping { id } => {
                put_control_header(dst, kind::PING, 0, 4)?;
                dst.put_u32(id);
            }
            Frame::GoAway {
                last_good_stream_id,
                status,
            } => {
                put_control_header(dst, kind::GOAWAY, 0, 8)?;
                dst.put_u32(last_good_stream_id & STREAM_ID_MASK);
                dst.put_u32(status.into());
            }
            Frame::Headers {
                stream_id,
                flags,
                header_block,
            } => {
                put_control_header(dst, kind::HEADERS, flags, 4 + header_block.len())?;
                dst.put_u32(stream_id & STREAM_ID_MASK);
                dst.put_slice(&header_block);
            }
            Frame::WindowUpdate { stream_id, delta } => {
                put_control_header(dst, kind::WINDOW_UPDATE, 0, 8)?;
                dst.put_u32(stream_id & STREAM_ID_MASK);
                dst.put_u32(delta & 0x7FFF_FFFF);
            }
            Frame::Data {
                stream_id,
                flags,
                data,
            } => {
                let len = checked_len(data.len())?;
                dst.reserve(HEADER_LEN + data.len());
                dst.put_u32(stream_id & STREAM_ID_MASK);
                dst.put_u32(((flags as u32) << 24) | len);
                dst.put_slice(&data);
            }
            Frame::Unknown {
                kind,
                flags,
                payload,
            } => {
                put_control_header(dst, kind, flags, payload.len())?;
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

fn checked_len(len: usize) -> Result<u32, FrameError> {
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::FrameTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(len as u32)
}

fn put_control_header(
    dst: &mut BytesMut,
    frame_kind: u16,
    flags: u8,
    len: usize,
) -> Result<(), FrameError> {
    let len = checked_len(len)?;
    dst.reserve(HEADER_LEN + len as usize);
    dst.put_u32(CONTROL_BIT | ((SPDY_VERSION as u32) << 16) | frame_kind as u32);
    dst.put_u32(((flags as u32) << 24) | len);
    Ok(())
}
