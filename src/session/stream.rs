//! Stream task: one per open stream.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::frame::{Frame, RstStatus};
use crate::observability::metrics;
use crate::session::control::Session;
use crate::session::handler::StreamContext;

pub(crate) async fn run_stream(session: Arc<Session>, stream_id: u32, mut rx: mpsc::Receiver<Frame>) {
    let ctx = StreamContext::new(stream_id, session.outbound().clone());
    let handler = Arc::clone(session.handler());
    let idle_timeout = session.config().stream_idle_timeout();
    metrics::stream_opened();

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!(
                        connection_id = %session.id(),
                        stream_id,
                        idle_ms = limit.as_millis() as u64,
                        "Stream idle timeout"
                    );
                    let rst = Frame::RstStream {
                        stream_id,
                        status: RstStatus::Cancel,
                    };
                    session.outbound().send(rst).await;
                    break;
                }
            },
            None => rx.recv().await,
        };
        match next {
            Some(frame) => handler.on_frame(&ctx, frame),
            None => break,
        }
    }

    handler.on_close(&ctx);
    drop(rx);
    session.registry().deregister(stream_id);
    metrics::stream_closed();
    tracing::trace!(connection_id = %session.id(), stream_id, "Stream finished");

    // The last stream of a draining session closes it.
    session.finish_if_drained();
}
