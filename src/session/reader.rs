//! Reader task: owns the read side and all stream registration.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::buffer::FrameReader;
use crate::frame::{Frame, RstStatus};
use crate::observability::metrics;
use crate::session::control::{CloseReason, Session};
use crate::session::registry::{Endpoint, RegistryError};
use crate::session::stream::run_stream;

/// Run the read loop until the session should close.
///
/// Returns the reason this loop ended, or `None` if another trigger had
/// already closed the session.
pub(crate) async fn run_reader<R>(
    session: &Arc<Session>,
    mut reader: FrameReader<R>,
    mut read_deadline: watch::Receiver<Option<Instant>>,
) -> Option<CloseReason>
where
    R: AsyncRead + Unpin,
{
    let id = session.id();
    let mut deadline: Option<Instant> = None;
    let mut deadline_open = true;

    loop {
        let next = tokio::select! {
            biased;
            _ = session.closed_token().cancelled() => return None,
            _ = deadline_elapsed(deadline) => {
                tracing::debug!(
                    connection_id = %id,
                    open_streams = session.registry().len(),
                    "Shutdown grace period elapsed"
                );
                return Some(CloseReason::ServerShutdown);
            }
            changed = read_deadline.changed(), if deadline_open => {
                match changed {
                    Ok(()) => deadline = *read_deadline.borrow_and_update(),
                    Err(_) => deadline_open = false,
                }
                if session.is_finished() {
                    return Some(CloseReason::ServerShutdown);
                }
                continue;
            }
            next = reader.read_frame() => next,
        };

        match next {
            Ok(Some(frame)) => dispatch(session, frame).await,
            Ok(None) => {
                tracing::debug!(connection_id = %id, "Peer closed connection");
                return Some(CloseReason::PeerClosed);
            }
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "Frame decode failed");
                return Some(CloseReason::DecodeError);
            }
        }

        if session.is_finished() {
            return Some(if session.peer_goaway() {
                CloseReason::PeerGoaway
            } else {
                CloseReason::ServerShutdown
            });
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn dispatch(session: &Arc<Session>, frame: Frame) {
    let id = session.id();
    metrics::frame_read(frame.kind_name());
    tracing::trace!(
        connection_id = %id,
        kind = frame.kind_name(),
        stream_id = frame.stream_id(),
        "Frame received"
    );

    match frame {
        Frame::Ping { .. } => {
            if !session.outbound().send(frame).await {
                tracing::trace!(connection_id = %id, "Ping echo dropped, session closing");
            }
        }
        Frame::GoAway {
            last_good_stream_id,
            status,
        } => {
            tracing::info!(
                connection_id = %id,
                last_good_stream_id,
                status = ?status,
                open_streams = session.registry().len(),
                "Peer sent GOAWAY"
            );
            session.mark_peer_goaway();
        }
        Frame::SynStream { stream_id, .. } => open_stream(session, stream_id, frame).await,
        Frame::Settings { ref entries, .. } => {
            tracing::debug!(connection_id = %id, entries = entries.len(), "Ignoring SETTINGS");
        }
        Frame::Unknown { kind, .. } => {
            tracing::debug!(connection_id = %id, kind, "Ignoring unknown control frame");
        }
        Frame::SynReply { .. }
        | Frame::RstStream { .. }
        | Frame::Headers { .. }
        | Frame::WindowUpdate { .. }
        | Frame::Data { .. } => route_to_stream(session, frame).await,
    }
}

async fn open_stream(session: &Arc<Session>, stream_id: u32, frame: Frame) {
    let id = session.id();

    if stream_id == 0 {
        violation(session, "zero_stream_id", stream_id);
        return;
    }
    if session.peer_goaway() {
        violation(session, "stream_after_goaway", stream_id);
        return;
    }
    // Invalid ids are violations even when a refusal would otherwise apply.
    if let Err(e) = session.registry().validate_new(stream_id) {
        invalid_id(session, e);
        return;
    }
    if session.registry().len() >= session.config().max_concurrent_streams {
        tracing::debug!(connection_id = %id, stream_id, "Stream limit reached, refusing");
        refuse(session, stream_id).await;
        return;
    }

    let fin = frame.is_fin();
    let (tx, rx) = mpsc::channel(session.config().stream_queue_depth.max(1));
    match session.registry().register(stream_id, tx.clone()) {
        Ok(()) => {}
        Err(RegistryError::Sealed(_)) => {
            tracing::debug!(connection_id = %id, stream_id, "Stream opened after GOAWAY, refusing");
            refuse(session, stream_id).await;
            return;
        }
        Err(e) => {
            invalid_id(session, e);
            return;
        }
    }

    tracing::debug!(
        connection_id = %id,
        stream_id,
        open_streams = session.registry().len(),
        "Stream opened"
    );
    session
        .streams()
        .spawn(run_stream(Arc::clone(session), stream_id, rx));

    deliver(session, &tx, frame).await;
    if fin {
        session.registry().close_endpoint(stream_id);
    }
}

fn invalid_id(session: &Session, e: RegistryError) {
    tracing::warn!(connection_id = %session.id(), error = %e, "Protocol violation, SYN_STREAM dropped");
    metrics::protocol_violation(match e {
        RegistryError::Duplicate(_) => "duplicate_stream",
        _ => "stream_id_not_increasing",
    });
}

async fn route_to_stream(session: &Arc<Session>, frame: Frame) {
    let Some(stream_id) = frame.stream_id() else {
        return;
    };
    let Some(endpoint) = session.registry().lookup(stream_id) else {
        violation(session, "unknown_stream", stream_id);
        return;
    };

    let ends_stream = frame.ends_stream();
    deliver(session, &endpoint, frame).await;
    if ends_stream {
        session.registry().close_endpoint(stream_id);
    }
}

/// Blocking hand-off to a stream, abandoned if the session closes.
async fn deliver(session: &Session, endpoint: &Endpoint, frame: Frame) -> bool {
    tokio::select! {
        biased;
        _ = session.closed_token().cancelled() => false,
        res = endpoint.send(frame) => res.is_ok(),
    }
}

async fn refuse(session: &Session, stream_id: u32) {
    let rst = Frame::RstStream {
        stream_id,
        status: RstStatus::RefusedStream,
    };
    session.outbound().send(rst).await;
}

fn violation(session: &Session, kind: &'static str, stream_id: u32) {
    tracing::warn!(
        connection_id = %session.id(),
        stream_id,
        violation = kind,
        "Protocol violation, frame dropped"
    );
    metrics::protocol_violation(kind);
}
