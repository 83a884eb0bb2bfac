//! Multiplexing server.

use std::sync::Arc;

use crate::buffer::BufferPool;
use crate::config::ServerConfig;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::session::{SessionManager, StreamHandler};

/// Serves multiplexed sessions on a bound [`Listener`].
pub struct MuxServer {
    config: ServerConfig,
    manager: SessionManager,
    tracker: ConnectionTracker,
}

impl MuxServer {
    /// Create a server whose streams are handled by `handler`.
    pub fn new(config: ServerConfig, handler: Arc<dyn StreamHandler>) -> Self {
        let tracker = ConnectionTracker::new();
        let pool = BufferPool::from_config(&config.buffers);
        let manager = SessionManager::new(
            config.session.clone(),
            pool,
            handler,
            Arc::new(tracker.clone()),
        );
        Self {
            config,
            manager,
            tracker,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Live connection accounting, shared with every session.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accept connections until `shutdown` fires, then drain.
    ///
    /// Sessions see the same signal, announce GOAWAY and finish their open
    /// streams. Returns after every session closed or the drain timeout
    /// elapsed.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "Mux server starting");

        let mut stop = shutdown.subscribe();
        loop {
            // Subscribed before accepting so a stop fired mid-accept still reaches the session.
            let stop_accepting = shutdown.subscribe();

            let accepted = tokio::select! {
                biased;
                _ = stop.recv() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }

            let id = self.tracker.open();
            let manager = self.manager.clone();
            tracing::debug!(connection_id = %id, peer_addr = %peer_addr, "Session accepted");

            tokio::spawn(async move {
                let _permit = permit;
                let reason = manager.handle_connection(id, stream, stop_accepting).await;
                tracing::debug!(
                    connection_id = %id,
                    peer_addr = %peer_addr,
                    reason = %reason,
                    "Connection closed"
                );
            });
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Stopped accepting, draining sessions"
        );

        let drain = self.config.session.drain_timeout();
        if tokio::time::timeout(drain, self.tracker.wait_idle()).await.is_err() {
            tracing::warn!(
                active_connections = self.tracker.active_count(),
                drain_secs = drain.as_secs(),
                "Drain timeout elapsed with sessions still open"
            );
        }

        tracing::info!("Mux server stopped");
        Ok(())
    }
}
