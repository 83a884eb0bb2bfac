//! Writer task: the only code path that writes to the connection.

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::buffer::FrameWriter;
use crate::frame::{Frame, GoAwayStatus};
use crate::observability::metrics;
use crate::session::control::{CloseReason, Session};

/// Multi-producer hand-off into the writer.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl Outbound {
    pub(crate) fn new(tx: mpsc::Sender<Frame>, closed: CancellationToken) -> Self {
        Self { tx, closed }
    }

    /// Queue a frame for writing.
    ///
    /// Waits for queue space, but gives up as soon as the session closes.
    /// Returns false if the frame was dropped.
    pub async fn send(&self, frame: Frame) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            res = self.tx.send(frame) => res.is_ok(),
        }
    }
}

pub(crate) async fn run_writer<W>(
    session: Arc<Session>,
    mut writer: FrameWriter<W>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    mut stop_accepting: broadcast::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    let id = session.id();
    let mut stop_seen = false;

    loop {
        tokio::select! {
            biased;
            _ = session.closed_token().cancelled() => break,
            res = stop_accepting.recv(), if !stop_seen => {
                stop_seen = true;
                if let Err(RecvError::Closed) = res {
                    // Coordinator dropped without firing; nothing to observe.
                    continue;
                }
                if !announce_goaway(&session, &mut writer, None).await {
                    break;
                }
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                let kind = frame.kind_name();

                // A peer that stops reading can park this write indefinitely.
                let (res, drain_deadline) = {
                    let write = writer.write_frame(frame);
                    tokio::pin!(write);
                    let mut drain_deadline = None;
                    let res = loop {
                        tokio::select! {
                            biased;
                            _ = session.closed_token().cancelled() => break None,
                            res = stop_accepting.recv(), if !stop_seen => {
                                stop_seen = true;
                                if !matches!(res, Err(RecvError::Closed)) {
                                    drain_deadline = Some(begin_drain(&session));
                                }
                            }
                            res = &mut write => break Some(res),
                        }
                    };
                    (res, drain_deadline)
                };

                let Some(res) = res else { break };
                if let Err(e) = res {
                    tracing::debug!(connection_id = %id, error = %e, "Frame write failed");
                    session.shutdown(CloseReason::WriteFailed);
                    break;
                }
                tracing::trace!(connection_id = %id, kind, "Frame written");
                metrics::frame_written(kind);

                if drain_deadline.is_some() && !announce_goaway(&session, &mut writer, drain_deadline).await {
                    break;
                }
            }
        }
    }

    let grace = session.config().shutdown_grace();
    match tokio::time::timeout(grace, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::trace!(connection_id = %id, error = %e, "Write shutdown failed"),
        Err(_) => tracing::debug!(connection_id = %id, "Write shutdown timed out"),
    }
}

/// Stop accepting while a write is still pending: seal now and start the
/// read-side grace period, GOAWAY follows once the writer is free.
fn begin_drain(session: &Session) -> Instant {
    let last_good_stream_id = session.registry().seal();
    tracing::debug!(
        connection_id = %session.id(),
        last_good_stream_id,
        "Server stopping during a blocked write"
    );
    let deadline = Instant::now() + session.config().shutdown_grace();
    session.arm_read_deadline(deadline);
    deadline
}

/// Seal the registry, tell the peer, then start the read-side grace period.
///
/// `armed` is the deadline already in force when draining began during a
/// blocked write. The GOAWAY write itself never outlives the deadline.
async fn announce_goaway<W>(
    session: &Session,
    writer: &mut FrameWriter<W>,
    armed: Option<Instant>,
) -> bool
where
    W: AsyncWrite + Unpin,
{
    let deadline = armed.unwrap_or_else(|| Instant::now() + session.config().shutdown_grace());
    let last_good_stream_id = session.registry().seal();
    tracing::info!(
        connection_id = %session.id(),
        last_good_stream_id,
        open_streams = session.registry().len(),
        "Server stopping, sending GOAWAY"
    );

    let goaway = Frame::GoAway {
        last_good_stream_id,
        status: GoAwayStatus::Ok,
    };
    let res = tokio::select! {
        biased;
        _ = session.closed_token().cancelled() => return false,
        _ = tokio::time::sleep_until(deadline) => {
            tracing::debug!(connection_id = %session.id(), "GOAWAY write outlived the grace period");
            session.shutdown(CloseReason::ServerShutdown);
            return false;
        }
        res = writer.write_frame(goaway) => res,
    };
    if let Err(e) = res {
        tracing::debug!(connection_id = %session.id(), error = %e, "GOAWAY write failed");
        session.shutdown(CloseReason::WriteFailed);
        return false;
    }
    metrics::frame_written("goaway");

    if armed.is_none() {
        session.arm_read_deadline(deadline);
    }
    true
}
