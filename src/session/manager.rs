//! Entry point that turns an accepted connection into a running session.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

use crate::buffer::{BufferPool, FrameReader, FrameWriter};
use crate::config::SessionConfig;
use crate::frame::codec::FrameCodec;
use crate::net::{ConnectionId, ConnectionObserver};
use crate::observability::metrics;
use crate::session::control::{CloseReason, Session};
use crate::session::handler::StreamHandler;
use crate::session::reader::run_reader;
use crate::session::writer::run_writer;

/// Builds and drives sessions. Cheap to clone; one per server.
#[derive(Clone)]
pub struct SessionManager {
    config: SessionConfig,
    codec: FrameCodec,
    pool: BufferPool,
    handler: Arc<dyn StreamHandler>,
    observer: Arc<dyn ConnectionObserver>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        pool: BufferPool,
        handler: Arc<dyn StreamHandler>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        let codec = FrameCodec::new(config.max_frame_len);
        Self {
            config,
            codec,
            pool,
            handler,
            observer,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Run a session over `io` until it closes.
    ///
    /// `stop_accepting` fires when the server stops taking new work; the
    /// session then announces GOAWAY and drains. Returns once the reader,
    /// the writer and every stream task have exited. The observer is told
    /// the connection finished exactly once, including when buffers could
    /// not be acquired.
    pub async fn handle_connection<S>(
        &self,
        id: ConnectionId,
        io: S,
        stop_accepting: broadcast::Receiver<()>,
    ) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.drive(id, io, stop_accepting, |_| {}).await
    }

    /// Same as [`handle_connection`](Self::handle_connection), handing the
    /// session to `inspect` once its tasks are running.
    pub(crate) async fn drive<S, F>(
        &self,
        id: ConnectionId,
        io: S,
        stop_accepting: broadcast::Receiver<()>,
        inspect: F,
    ) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce(&Arc<Session>),
    {
        let _finished = FinishGuard {
            id,
            observer: self.observer.as_ref(),
        };

        let (read_buf, write_buf) = match (self.pool.acquire(), self.pool.acquire()) {
            (Ok(read_buf), Ok(write_buf)) => (read_buf, write_buf),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(connection_id = %id, error = %e, "Connection buffers unavailable");
                metrics::resource_failure();
                return CloseReason::ResourceUnavailable;
            }
        };

        let (read_half, write_half) = tokio::io::split(io);
        let reader = FrameReader::new(read_half, read_buf, self.codec);
        let writer = FrameWriter::new(write_half, write_buf, self.codec);

        let (session, channels) = Session::new(id, self.config.clone(), Arc::clone(&self.handler));
        metrics::session_opened();
        tracing::debug!(connection_id = %id, "Session started");

        let writer_task = tokio::spawn(run_writer(
            Arc::clone(&session),
            writer,
            channels.outbound_rx,
            stop_accepting,
        ));
        inspect(&session);

        if let Some(reason) = run_reader(&session, reader, channels.read_deadline).await {
            session.shutdown(reason);
        }

        if let Err(e) = writer_task.await {
            tracing::warn!(connection_id = %id, error = %e, "Writer task failed");
            session.shutdown(CloseReason::WriteFailed);
        }

        session.streams().close();
        session.streams().wait().await;

        let reason = session.close_reason().unwrap_or(CloseReason::PeerClosed);
        tracing::debug!(connection_id = %id, reason = %reason, "Session finished");
        reason
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Notifies the observer when dropped.
struct FinishGuard<'a> {
    id: ConnectionId,
    observer: &'a dyn ConnectionObserver,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.observer.connection_finished(self.id);
    }
}
