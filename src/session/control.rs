//! Shared session state and the once-only shutdown trigger.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SessionConfig;
use crate::frame::Frame;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::session::handler::StreamHandler;
use crate::session::registry::StreamRegistry;
use crate::session::writer::Outbound;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting and serving streams.
    Active,
    /// The peer sent GOAWAY; open streams finish, no new ones start.
    DrainingPeerGoaway,
    /// Torn down. No further reads or writes.
    Closed,
}

/// Why a session closed. Recorded by whichever trigger fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent GOAWAY and every stream finished.
    PeerGoaway,
    /// Peer closed the connection on a frame boundary.
    PeerClosed,
    /// Inbound bytes could not be decoded.
    DecodeError,
    /// Writing to the connection failed.
    WriteFailed,
    /// The server stopped accepting work.
    ServerShutdown,
    /// Connection buffers could not be acquired; no tasks were started.
    ResourceUnavailable,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerGoaway => "peer_goaway",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::DecodeError => "decode_error",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::ServerShutdown => "server_shutdown",
            CloseReason::ResourceUnavailable => "resource_unavailable",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared by the reader, the writer and every stream task of one connection.
pub struct Session {
    id: ConnectionId,
    config: SessionConfig,
    registry: StreamRegistry,
    outbound: Outbound,
    handler: Arc<dyn StreamHandler>,
    streams: TaskTracker,
    closed: CancellationToken,
    fired: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    peer_goaway: AtomicBool,
    read_deadline: watch::Sender<Option<Instant>>,
}

/// Receiving ends handed to the session tasks.
pub(crate) struct SessionChannels {
    pub outbound_rx: mpsc::Receiver<Frame>,
    pub read_deadline: watch::Receiver<Option<Instant>>,
}

impl Session {
    pub(crate) fn new(
        id: ConnectionId,
        config: SessionConfig,
        handler: Arc<dyn StreamHandler>,
    ) -> (Arc<Self>, SessionChannels) {
        let closed = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_depth.max(1));
        let (read_deadline, deadline_rx) = watch::channel(None);

        let session = Arc::new(Self {
            id,
            config,
            registry: StreamRegistry::new(),
            outbound: Outbound::new(outbound_tx, closed.clone()),
            handler,
            streams: TaskTracker::new(),
            closed,
            fired: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            peer_goaway: AtomicBool::new(false),
            read_deadline,
        });
        let channels = SessionChannels {
            outbound_rx,
            read_deadline: deadline_rx,
        };
        (session, channels)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Hand-off queue into the writer.
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub(crate) fn handler(&self) -> &Arc<dyn StreamHandler> {
        &self.handler
    }

    pub(crate) fn streams(&self) -> &TaskTracker {
        &self.streams
    }

    pub(crate) fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else if self.peer_goaway() {
            SessionState::DrainingPeerGoaway
        } else {
            SessionState::Active
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    pub fn peer_goaway(&self) -> bool {
        self.peer_goaway.load(Ordering::Acquire)
    }

    /// Whether the server announced GOAWAY on this session.
    pub fn local_goaway(&self) -> bool {
        self.registry.is_sealed()
    }

    pub(crate) fn mark_peer_goaway(&self) {
        self.peer_goaway.store(true, Ordering::Release);
    }

    /// Arm the read-side deadline after the server stopped accepting.
    pub(crate) fn arm_read_deadline(&self, deadline: Instant) {
        self.read_deadline.send_replace(Some(deadline));
    }

    /// No new streams will start and none are left.
    pub fn is_finished(&self) -> bool {
        (self.peer_goaway() || self.local_goaway()) && self.registry.is_empty()
    }

    /// Shut down if the session has drained. Returns whether this call closed it.
    pub(crate) fn finish_if_drained(&self) -> bool {
        if !self.is_finished() {
            return false;
        }
        let reason = if self.peer_goaway() {
            CloseReason::PeerGoaway
        } else {
            CloseReason::ServerShutdown
        };
        self.shutdown(reason)
    }

    /// Close the session. Only the first call has any effect.
    ///
    /// Returns true for the call that performed the teardown.
    pub fn shutdown(&self, reason: CloseReason) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            tracing::trace!(
                connection_id = %self.id,
                reason = %reason,
                "Session already closed"
            );
            return false;
        }

        *self.close_reason.lock() = Some(reason);
        self.closed.cancel();
        self.registry.close_all();

        tracing::debug!(
            connection_id = %self.id,
            reason = %reason,
            open_streams = self.registry.len(),
            "Session closed"
        );
        metrics::session_closed(reason.as_str());
        true
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("open_streams", &self.registry.len())
            .finish_non_exhaustive()
    }
}
