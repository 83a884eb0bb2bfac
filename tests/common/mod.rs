//! Shared utilities for integration tests.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use mux_server::frame::{Frame, FrameCodec};
use mux_server::session::{StreamContext, StreamHandler};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn syn(stream_id: u32) -> Frame {
    Frame::SynStream {
        stream_id,
        associated_stream_id: 0,
        priority: 0,
        slot: 0,
        flags: 0,
        header_block: Bytes::from_static(b":method GET"),
    }
}

pub fn data(stream_id: u32, flags: u8, body: &'static [u8]) -> Frame {
    Frame::Data {
        stream_id,
        flags,
        data: Bytes::from_static(body),
    }
}

/// Next frame from the server, or `None` once it closed the connection.
pub async fn recv<T>(peer: &mut Framed<T, FrameCodec>) -> Option<Frame>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(WAIT, peer.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|frame| frame.expect("decode frame"))
}

/// Answers SYN_STREAM with SYN_REPLY and echoes DATA back.
#[allow(dead_code)]
pub struct EchoHandler;

impl StreamHandler for EchoHandler {
    fn on_frame(&self, stream: &StreamContext, frame: Frame) {
        let reply = match frame {
            Frame::SynStream {
                stream_id,
                header_block,
                ..
            } => Frame::SynReply {
                stream_id,
                flags: 0,
                header_block,
            },
            Frame::Data { .. } => frame,
            _ => return,
        };
        let outbound = stream.outbound().clone();
        tokio::spawn(async move {
            outbound.send(reply).await;
        });
    }
}
