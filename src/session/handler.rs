//! Hand-off from stream tasks to application logic.

use crate::frame::Frame;
use crate::session::writer::Outbound;

/// Per-stream context passed to a [`StreamHandler`].
#[derive(Debug, Clone)]
pub struct StreamContext {
    stream_id: u32,
    outbound: Outbound,
}

impl StreamContext {
    pub(crate) fn new(stream_id: u32, outbound: Outbound) -> Self {
        Self {
            stream_id,
            outbound,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Queue for frames going back to the peer through the session writer.
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }
}

/// Application logic attached to each stream.
///
/// Frames arrive in wire order; the first is always the stream's SYN_STREAM.
/// Calls for one stream never overlap. Replies go through
/// [`StreamContext::outbound`], typically from a task the handler spawns.
pub trait StreamHandler: Send + Sync + 'static {
    fn on_frame(&self, stream: &StreamContext, frame: Frame);

    /// The stream's delivery queue ended.
    fn on_close(&self, _stream: &StreamContext) {}
}

/// Logs and drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

impl StreamHandler for DiscardHandler {
    fn on_frame(&self, stream: &StreamContext, frame: Frame) {
        tracing::trace!(
            stream_id = stream.stream_id(),
            kind = frame.kind_name(),
            "Discarding stream frame"
        );
    }
}
